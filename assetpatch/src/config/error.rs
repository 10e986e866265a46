//! Error types for configuration loading.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while reading or writing configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The config file exists but could not be parsed.
    ReadFailed { path: PathBuf, reason: String },

    /// Failed to write the config file.
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to create the config directory.
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// A value could not be parsed for its key.
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// `section.key` does not name a known setting.
    UnknownKey(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed { path, reason } => {
                write!(f, "Failed to read config {}: {}", path.display(), reason)
            }
            ConfigError::WriteFailed { path, source } => {
                write!(f, "Failed to write config {}: {}", path.display(), source)
            }
            ConfigError::CreateDirFailed { path, source } => {
                write!(f, "Failed to create directory {}: {}", path.display(), source)
            }
            ConfigError::InvalidValue { key, value, reason } => {
                write!(f, "Invalid value '{}' for {}: {}", value, key, reason)
            }
            ConfigError::UnknownKey(key) => write!(f, "Unknown configuration key '{}'", key),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::WriteFailed { source, .. } => Some(source),
            ConfigError::CreateDirFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}
