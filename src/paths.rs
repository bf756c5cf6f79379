//! Small filesystem helpers shared by the bootstrap renderer and the log
//! archiver.

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};

/// Expands a leading `~/` prefix to the user's home directory.
///
/// When `HOME` is unset the input is returned unchanged.
///
/// # Examples
///
/// ```
/// # use stackswap::paths::expand_tilde;
/// assert_eq!(expand_tilde("/absolute/path"), "/absolute/path");
/// assert_eq!(expand_tilde("relative/path"), "relative/path");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Reads a UTF-8 file through an ambient capability on its parent directory.
///
/// Relative paths resolve against the working directory.
///
/// # Errors
///
/// Returns the I/O error message when the directory cannot be opened or the
/// file cannot be read.
pub fn read_to_string_ambient(path: &Utf8Path) -> Result<String, String> {
    let (dir_path, file_path) = split_parent(path)?;
    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_path).map_err(|err| err.to_string())
}

/// Returns the size in bytes of a file, using the same capability model as
/// [`read_to_string_ambient`].
///
/// # Errors
///
/// Returns the I/O error message when the metadata cannot be read.
pub fn file_len_ambient(path: &Utf8Path) -> Result<u64, String> {
    let (dir_path, file_path) = split_parent(path)?;
    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.metadata(file_path)
        .map(|metadata| metadata.len())
        .map_err(|err| err.to_string())
}

/// Creates `path` and any missing parents.
///
/// # Errors
///
/// Returns the I/O error message when a directory cannot be created.
pub fn create_dir_all_ambient(path: &Utf8Path) -> Result<(), String> {
    Dir::create_ambient_dir_all(path, ambient_authority()).map_err(|err| err.to_string())
}

/// Creates (or truncates) a file for writing.
///
/// # Errors
///
/// Returns the I/O error message when the parent directory cannot be opened
/// or the file cannot be created.
pub fn create_file_ambient(path: &Utf8Path) -> Result<cap_std::fs_utf8::File, String> {
    let (dir_path, file_path) = split_parent(path)?;
    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.create(file_path).map_err(|err| err.to_string())
}

/// Removes a directory and everything beneath it.
///
/// # Errors
///
/// Returns the I/O error message when the parent cannot be opened or the
/// removal fails.
pub fn remove_dir_all_ambient(path: &Utf8Path) -> Result<(), String> {
    let (dir_path, entry) = split_parent(path)?;
    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.remove_dir_all(entry).map_err(|err| err.to_string())
}

/// Removes a single file.
///
/// # Errors
///
/// Returns the I/O error message when the parent cannot be opened or the
/// file cannot be removed.
pub fn remove_file_ambient(path: &Utf8Path) -> Result<(), String> {
    let (dir_path, file_path) = split_parent(path)?;
    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.remove_file(file_path).map_err(|err| err.to_string())
}

fn split_parent(path: &Utf8Path) -> Result<(&Utf8Path, &Utf8Path), String> {
    if !path.is_absolute() {
        return Ok((Utf8Path::new("."), path));
    }
    let parent = path
        .parent()
        .ok_or_else(|| format!("path has no parent directory: {path}"))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| format!("path has no file name: {path}"))?;
    Ok((parent, Utf8Path::new(file_name)))
}
