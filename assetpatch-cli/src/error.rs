//! CLI error type.

use std::fmt;

use assetpatch::config::ConfigError;
use assetpatch::logging::LoggingError;
use assetpatch::manifest::{ManifestError, ResolveError};
use assetpatch::package::PackageError;

/// Errors surfaced to the user by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Configuration could not be loaded, saved or parsed.
    Config(String),

    /// Logging could not be set up.
    Logging(String),

    /// The package could not be created.
    Package(String),

    /// A manifest file could not be read or decoded.
    Manifest(String),

    /// An async operation finished with `Failed`.
    Operation { name: &'static str, reason: String },

    /// Interrupted by Ctrl+C.
    Interrupted,
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Logging(msg) => write!(f, "Logging error: {}", msg),
            CliError::Package(msg) => write!(f, "Package error: {}", msg),
            CliError::Manifest(msg) => write!(f, "Manifest error: {}", msg),
            CliError::Operation { name, reason } => write!(f, "{} failed: {}", name, reason),
            CliError::Interrupted => write!(f, "Interrupted"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e.to_string())
    }
}

impl From<PackageError> for CliError {
    fn from(e: PackageError) -> Self {
        CliError::Package(e.to_string())
    }
}

impl From<ManifestError> for CliError {
    fn from(e: ManifestError) -> Self {
        CliError::Manifest(e.to_string())
    }
}

impl From<ResolveError> for CliError {
    fn from(e: ResolveError) -> Self {
        CliError::Package(e.to_string())
    }
}
