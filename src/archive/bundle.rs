//! Timestamped gzip tarballs of collected logs.

use std::io::Write;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::paths::create_file_ambient;

/// `<prefix>-<YYYY-MM-DDTHH-MM-SS>`; colons are avoided so the name is a
/// valid file name everywhere.
#[must_use]
pub fn bundle_stem(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{prefix}-{}", at.format("%Y-%m-%dT%H-%M-%S"))
}

/// Packs `source_dir` under the top-level directory `root_name` into a
/// gzip-compressed tarball at `dest`.
pub(crate) fn write_tarball(
    source_dir: &Utf8Path,
    root_name: &str,
    dest: &Utf8Path,
) -> Result<(), String> {
    let file = create_file_ambient(dest)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder
        .append_dir_all(root_name, source_dir)
        .map_err(|err| err.to_string())?;
    let encoder = builder.into_inner().map_err(|err| err.to_string())?;
    let mut file = encoder.finish().map_err(|err| err.to_string())?;
    file.flush().map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use chrono::TimeZone;
    use flate2::read::GzDecoder;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    fn stems_use_a_filesystem_safe_timestamp() {
        let at = Utc
            .with_ymd_and_hms(2019, 3, 4, 5, 6, 7)
            .single()
            .unwrap_or_else(|| panic!("valid timestamp"));
        assert_eq!(bundle_stem("stack-a", at), "stack-a-2019-03-04T05-06-07");
    }

    #[rstest]
    fn tarball_contains_staged_files_under_root() {
        let dir = TempDir::new().unwrap_or_else(|err| panic!("temp dir: {err}"));
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp dir is not UTF-8: {}", path.display()));
        let staged = root.join("stage");
        std::fs::create_dir_all(staged.join("logs"))
            .unwrap_or_else(|err| panic!("mkdir: {err}"));
        std::fs::write(staged.join("logs/web.log"), "GET / 200\n")
            .unwrap_or_else(|err| panic!("write: {err}"));
        std::fs::write(staged.join("cloud-init.log"), "boot\n")
            .unwrap_or_else(|err| panic!("write: {err}"));

        let dest = root.join("bundle.tar.gz");
        write_tarball(&staged, "bundle", &dest).unwrap_or_else(|err| panic!("tar: {err}"));

        let file = std::fs::File::open(&dest).unwrap_or_else(|err| panic!("open: {err}"));
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let mut names: Vec<String> = archive
            .entries()
            .unwrap_or_else(|err| panic!("entries: {err}"))
            .filter_map(Result::ok)
            .filter_map(|entry| {
                entry
                    .path()
                    .ok()
                    .map(|path| path.to_string_lossy().into_owned())
            })
            .filter(|name| !name.ends_with('/'))
            .collect();
        names.sort();
        assert!(names.contains(&"bundle/cloud-init.log".to_owned()), "{names:?}");
        assert!(names.contains(&"bundle/logs/web.log".to_owned()), "{names:?}");
    }
}
