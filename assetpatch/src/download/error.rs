//! Error types for the download layer.

use std::io;
use std::path::PathBuf;

use crate::cache::{CacheError, VerifyResult};

/// Result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Message reported when a download is aborted by its owner.
pub const USER_ABORT: &str = "user abort";

/// Errors that can occur while fetching remote or built-in files.
#[derive(Debug)]
pub enum DownloadError {
    /// The transport could not open or read the URL.
    RequestFailed { url: String, reason: String },

    /// The server answered with a non-success status.
    HttpStatus { url: String, code: u16 },

    /// No bytes arrived within the stall timeout.
    Timeout { url: String, timeout_secs: u64 },

    /// URL scheme has no transport.
    UnsupportedScheme(String),

    /// Failed to write a downloaded file.
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory.
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// Downloaded file did not pass verification.
    VerifyFailed { path: PathBuf, result: VerifyResult },

    /// Promoting the file into the cache failed.
    Cache(CacheError),

    /// The owner aborted the request.
    Aborted,

    /// A background thread could not be started.
    Thread(String),
}

impl DownloadError {
    /// HTTP status code, when the failure carries one.
    pub fn http_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl std::fmt::Display for DownloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequestFailed { url, reason } => {
                write!(f, "failed to download {}: {}", url, reason)
            }
            Self::HttpStatus { url, code } => {
                write!(f, "request to {} failed with status {}", url, code)
            }
            Self::Timeout { url, timeout_secs } => {
                write!(f, "request to {} timed out after {}s", url, timeout_secs)
            }
            Self::UnsupportedScheme(url) => write!(f, "unsupported URL scheme: {}", url),
            Self::WriteFailed { path, source } => {
                write!(f, "failed to write {}: {}", path.display(), source)
            }
            Self::CreateDirFailed { path, source } => {
                write!(
                    f,
                    "failed to create directory {}: {}",
                    path.display(),
                    source
                )
            }
            Self::VerifyFailed { path, result } => {
                write!(f, "verify {} failed: {}", path.display(), result)
            }
            Self::Cache(e) => write!(f, "cache error: {}", e),
            Self::Aborted => write!(f, "{}", USER_ABORT),
            Self::Thread(msg) => write!(f, "failed to start download thread: {}", msg),
        }
    }
}

impl std::error::Error for DownloadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::WriteFailed { source, .. } => Some(source),
            Self::CreateDirFailed { source, .. } => Some(source),
            Self::Cache(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CacheError> for DownloadError {
    fn from(e: CacheError) -> Self {
        Self::Cache(e)
    }
}
