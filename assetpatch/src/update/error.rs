//! Error types for the version update flow.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::download::DownloadError;
use crate::manifest::ManifestError;

/// Result type for update operations.
pub type UpdateResult<T> = Result<T, UpdateError>;

/// Errors raised while fetching, checking or adopting a manifest.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// The remote version file was empty.
    #[error("remote version file {url} is empty")]
    EmptyVersion { url: String },

    /// A version string is not usable in manifest file names.
    #[error("invalid package version {0:?}")]
    InvalidVersion(String),

    /// Downloaded manifest does not match the published hash.
    #[error("manifest hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// Manifest content carries a different version than requested.
    #[error("manifest is version {found}, expected {expected}")]
    VersionMismatch { expected: String, found: String },

    /// Manifest belongs to another package.
    #[error("manifest is for package {found}, expected {expected}")]
    PackageMismatch { expected: String, found: String },

    /// Reading or writing a local manifest file failed.
    #[error("failed to access {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    /// No manifest could be loaded for the package.
    #[error("no manifest available for package {0}")]
    NoManifest(String),
}

impl UpdateError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
