//! Info file records.
//!
//! An info file stores the CRC and size a data file had when it passed
//! verification. It is encoded with the manifest buffer format (UTF-8 CRC
//! string followed by an `i64` size) and always written through a temp file
//! and rename, so readers never see a half-written record.

use std::fs;
use std::path::Path;

use super::error::{CacheError, CacheResult};
use super::layout::temp_path_for;
use crate::manifest::buffer::{BufferReader, BufferWriter};

/// Write an info file atomically.
pub fn write_info_file(path: &Path, crc: &str, size: u64) -> CacheResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| CacheError::CreateDirFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let mut writer = BufferWriter::new();
    writer
        .write_utf8(crc)
        .map_err(|e| CacheError::InvalidInfoFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    writer.write_i64(i64::try_from(size).unwrap_or(i64::MAX));

    let temp = temp_path_for(path);
    fs::write(&temp, writer.into_bytes()).map_err(|e| CacheError::WriteFailed {
        path: temp.clone(),
        source: e,
    })?;
    fs::rename(&temp, path).map_err(|e| CacheError::MoveFailed {
        from: temp,
        to: path.to_path_buf(),
        source: e,
    })
}

/// Read an info file, returning `(crc, size)`.
pub fn read_info_file(path: &Path) -> CacheResult<(String, u64)> {
    let bytes = fs::read(path).map_err(|e| CacheError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let invalid = |reason: String| CacheError::InvalidInfoFile {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = BufferReader::new(bytes);
    let crc = reader.read_utf8().map_err(|e| invalid(e.to_string()))?;
    let size = reader.read_i64().map_err(|e| invalid(e.to_string()))?;
    let size = u64::try_from(size).map_err(|_| invalid(format!("negative size {}", size)))?;
    if reader.remaining() != 0 {
        return Err(invalid(format!("{} trailing bytes", reader.remaining())));
    }

    Ok((crc, size))
}
