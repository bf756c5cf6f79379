//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use tempfile::TempDir;

#[test]
fn help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("stackswap");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(contains("deploy"))
        .stdout(contains("render-bootstrap"));
}

#[test]
fn deploy_without_configuration_is_rejected() {
    let workdir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let mut cmd = cargo_bin_cmd!("stackswap");
    cmd.current_dir(workdir.path())
        .env("HOME", workdir.path())
        .env_remove("DIGITALOCEAN_TOKEN")
        .env_remove("DIGITALOCEAN_SNAPSHOT_NAME")
        .env_remove("DIGITALOCEAN_FLOATING_IP")
        .env_remove("STACKSWAP_CONFIG_PATH")
        .args(["deploy", "--release", "abc1234"])
        .assert()
        .code(1)
        .stdout("")
        .stderr(contains("ConfigurationInvalid"));
}

#[test]
fn malformed_release_is_rejected_before_any_request() {
    let mut cmd = cargo_bin_cmd!("stackswap");
    cmd.args(["deploy", "--release", "not a sha"])
        .env("DIGITALOCEAN_TOKEN", "dop_v1_example")
        .env("DIGITALOCEAN_SNAPSHOT_NAME", "stack-base")
        .env("DIGITALOCEAN_FLOATING_IP", "203.0.113.50")
        .env("STACKSWAP_ARCHIVE_BUCKET", "logs")
        .env("DIGITALOCEAN_API_BASE", "http://127.0.0.1:9")
        .assert()
        .code(1)
        .stderr(contains("ConfigurationInvalid"));
}

#[test]
fn build_renders_a_page_per_subcommand() {
    for (page, title) in [
        ("stackswap.1", "stackswap"),
        ("stackswap-deploy.1", "stackswap-deploy"),
        ("stackswap-render-bootstrap.1", "stackswap-render-bootstrap"),
    ] {
        let path = std::path::Path::new(env!("OUT_DIR")).join(page);
        let rendered = std::fs::read_to_string(&path)
            .unwrap_or_else(|err| panic!("read {}: {err}", path.display()));
        assert!(rendered.contains(".TH"), "{page} is not a man page");
        assert!(rendered.contains(title), "{page} should name {title}");
    }
}
