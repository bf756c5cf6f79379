//! Renders `stackswap.1` and one page per subcommand into `OUT_DIR`.

use std::env;
use std::io::{self, Write};

use camino::Utf8PathBuf;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
#[expect(dead_code, reason = "the build script only renders the parser")]
mod cli;

fn render(command: clap::Command) -> io::Result<Vec<u8>> {
    let mut page = Vec::new();
    Man::new(command).render(&mut page)?;
    Ok(page)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = env::var("OUT_DIR")
        .map(Utf8PathBuf::from)
        .map_err(|err| io::Error::new(io::ErrorKind::NotFound, err))?;
    let dir = Dir::open_ambient_dir(&out_dir, ambient_authority())?;

    let root = cli::Cli::command();
    dir.write("stackswap.1", render(root.clone())?)?;
    for sub in root.get_subcommands() {
        let name = format!("stackswap-{}", sub.get_name());
        let page = render(sub.clone().name(name.clone()))?;
        dir.write(format!("{name}.1"), page)?;
    }
    Ok(())
}
