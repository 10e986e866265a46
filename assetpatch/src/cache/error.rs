//! Error types for the on-disk cache.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur while reading or mutating the cache directory.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to read a file.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write a file.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// Failed to move a file into place.
    #[error("failed to move {} to {}: {source}", from.display(), to.display())]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// Info file exists but cannot be decoded.
    #[error("invalid info file {}: {reason}", path.display())]
    InvalidInfoFile { path: PathBuf, reason: String },

    /// Failed to build the verification thread pool.
    #[error("failed to build verification thread pool: {0}")]
    ThreadPool(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_path() {
        let err = CacheError::ReadFailed {
            path: PathBuf::from("/cache/ab/abcd/__info"),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/cache/ab/abcd/__info"));
        assert!(msg.contains("gone"));
    }
}
