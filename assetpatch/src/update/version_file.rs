//! Plain-text package version files.

use std::fs;
use std::path::Path;

use super::error::{UpdateError, UpdateResult};
use crate::cache::temp_path_for;

/// Read a version file, trimming surrounding whitespace.
pub fn read_version_file(path: &Path) -> UpdateResult<String> {
    let text = fs::read_to_string(path).map_err(|e| UpdateError::io(path, e))?;
    Ok(text.trim().to_string())
}

/// Write a version file through a temp file and rename.
pub fn write_version_file(path: &Path, version: &str) -> UpdateResult<()> {
    write_file_atomic(path, version.as_bytes())
}

/// Replace `path` with `data` without exposing a half-written file.
pub fn write_file_atomic(path: &Path, data: &[u8]) -> UpdateResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| UpdateError::io(parent, e))?;
    }
    let temp = temp_path_for(path);
    fs::write(&temp, data).map_err(|e| UpdateError::io(&temp, e))?;
    fs::rename(&temp, path).map_err(|e| UpdateError::io(path, e))
}
