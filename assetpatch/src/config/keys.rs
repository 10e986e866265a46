//! Addressable `section.key` settings for get/set/list.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::error::{ConfigError, ConfigResult};
use super::file::ConfigFile;

/// A single setting in `config.ini`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    PackageName,
    PackagePlayMode,
    PackageBuiltinDir,
    PackageSimulateDir,
    PackageLocationToLower,
    PackageIncludeUntagged,
    CacheDirectory,
    RemoteMainUrl,
    RemoteFallbackUrl,
    DownloadTimeout,
    DownloadRetries,
    DownloadRetryDelayMs,
    DownloadResumeSize,
    DownloadClearCodes,
    DownloadParallel,
    VerifyLevel,
    VerifyThreaded,
    VerifyMaxConcurrency,
    LoggingFilter,
    LoggingDirectory,
}

const ALL_KEYS: &[ConfigKey] = &[
    ConfigKey::PackageName,
    ConfigKey::PackagePlayMode,
    ConfigKey::PackageBuiltinDir,
    ConfigKey::PackageSimulateDir,
    ConfigKey::PackageLocationToLower,
    ConfigKey::PackageIncludeUntagged,
    ConfigKey::CacheDirectory,
    ConfigKey::RemoteMainUrl,
    ConfigKey::RemoteFallbackUrl,
    ConfigKey::DownloadTimeout,
    ConfigKey::DownloadRetries,
    ConfigKey::DownloadRetryDelayMs,
    ConfigKey::DownloadResumeSize,
    ConfigKey::DownloadClearCodes,
    ConfigKey::DownloadParallel,
    ConfigKey::VerifyLevel,
    ConfigKey::VerifyThreaded,
    ConfigKey::VerifyMaxConcurrency,
    ConfigKey::LoggingFilter,
    ConfigKey::LoggingDirectory,
];

impl ConfigKey {
    /// Every key, grouped by section.
    pub fn all() -> &'static [ConfigKey] {
        ALL_KEYS
    }

    pub fn section(&self) -> &'static str {
        match self {
            Self::PackageName
            | Self::PackagePlayMode
            | Self::PackageBuiltinDir
            | Self::PackageSimulateDir
            | Self::PackageLocationToLower
            | Self::PackageIncludeUntagged => "package",
            Self::CacheDirectory => "cache",
            Self::RemoteMainUrl | Self::RemoteFallbackUrl => "remote",
            Self::DownloadTimeout
            | Self::DownloadRetries
            | Self::DownloadRetryDelayMs
            | Self::DownloadResumeSize
            | Self::DownloadClearCodes
            | Self::DownloadParallel => "download",
            Self::VerifyLevel | Self::VerifyThreaded | Self::VerifyMaxConcurrency => "verify",
            Self::LoggingFilter | Self::LoggingDirectory => "logging",
        }
    }

    pub fn key_name(&self) -> &'static str {
        match self {
            Self::PackageName => "name",
            Self::PackagePlayMode => "play_mode",
            Self::PackageBuiltinDir => "builtin_dir",
            Self::PackageSimulateDir => "simulate_dir",
            Self::PackageLocationToLower => "location_to_lower",
            Self::PackageIncludeUntagged => "include_untagged",
            Self::CacheDirectory => "directory",
            Self::RemoteMainUrl => "main_url",
            Self::RemoteFallbackUrl => "fallback_url",
            Self::DownloadTimeout => "timeout",
            Self::DownloadRetries => "retries",
            Self::DownloadRetryDelayMs => "retry_delay_ms",
            Self::DownloadResumeSize => "resume_size",
            Self::DownloadClearCodes => "clear_codes",
            Self::DownloadParallel => "parallel",
            Self::VerifyLevel => "level",
            Self::VerifyThreaded => "threaded",
            Self::VerifyMaxConcurrency => "max_concurrency",
            Self::LoggingFilter => "filter",
            Self::LoggingDirectory => "directory",
        }
    }

    /// `section.key`
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value as written to the file; empty when unset.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            Self::PackageName => config.package.name.clone(),
            Self::PackagePlayMode => config.package.play_mode.to_string(),
            Self::PackageBuiltinDir => path_string(&config.package.builtin_dir),
            Self::PackageSimulateDir => path_string(&config.package.simulate_dir),
            Self::PackageLocationToLower => config.package.location_to_lower.to_string(),
            Self::PackageIncludeUntagged => config.package.include_untagged.to_string(),
            Self::CacheDirectory => config.cache.directory.display().to_string(),
            Self::RemoteMainUrl => config.remote.main_url.clone(),
            Self::RemoteFallbackUrl => config.remote.fallback_url.clone(),
            Self::DownloadTimeout => config.download.timeout.to_string(),
            Self::DownloadRetries => config.download.retries.to_string(),
            Self::DownloadRetryDelayMs => config.download.retry_delay_ms.to_string(),
            Self::DownloadResumeSize => config.download.resume_size.to_string(),
            Self::DownloadClearCodes => config
                .download
                .clear_codes
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(","),
            Self::DownloadParallel => config.download.parallel.to_string(),
            Self::VerifyLevel => config.verify.level.to_string(),
            Self::VerifyThreaded => config.verify.threaded.to_string(),
            Self::VerifyMaxConcurrency => config.verify.max_concurrency.to_string(),
            Self::LoggingFilter => config.logging.filter.clone(),
            Self::LoggingDirectory => path_string(&config.logging.directory),
        }
    }

    /// Parse `value` and store it.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> ConfigResult<()> {
        let value = value.trim();
        match self {
            Self::PackageName => {
                if value.is_empty() {
                    return Err(self.invalid(value, "package name cannot be empty"));
                }
                config.package.name = value.to_string();
            }
            Self::PackagePlayMode => {
                config.package.play_mode =
                    value.parse().map_err(|e: String| self.invalid(value, e))?
            }
            Self::PackageBuiltinDir => config.package.builtin_dir = optional_path(value),
            Self::PackageSimulateDir => config.package.simulate_dir = optional_path(value),
            Self::PackageLocationToLower => config.package.location_to_lower = self.parse(value)?,
            Self::PackageIncludeUntagged => config.package.include_untagged = self.parse(value)?,
            Self::CacheDirectory => {
                if value.is_empty() {
                    return Err(self.invalid(value, "cache directory cannot be empty"));
                }
                config.cache.directory = PathBuf::from(value);
            }
            Self::RemoteMainUrl => config.remote.main_url = value.to_string(),
            Self::RemoteFallbackUrl => config.remote.fallback_url = value.to_string(),
            Self::DownloadTimeout => config.download.timeout = self.parse_positive(value)?,
            Self::DownloadRetries => config.download.retries = self.parse(value)?,
            Self::DownloadRetryDelayMs => config.download.retry_delay_ms = self.parse(value)?,
            Self::DownloadResumeSize => config.download.resume_size = self.parse(value)?,
            Self::DownloadClearCodes => {
                let codes = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| s.parse::<u16>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| self.invalid(value, e))?;
                config.download.clear_codes = codes;
            }
            Self::DownloadParallel => {
                config.download.parallel = self.parse_positive(value)? as usize
            }
            Self::VerifyLevel => {
                config.verify.level = value.parse().map_err(|e: String| self.invalid(value, e))?
            }
            Self::VerifyThreaded => config.verify.threaded = self.parse(value)?,
            Self::VerifyMaxConcurrency => {
                config.verify.max_concurrency = self.parse_positive(value)? as usize
            }
            Self::LoggingFilter => config.logging.filter = value.to_string(),
            Self::LoggingDirectory => config.logging.directory = optional_path(value),
        }
        Ok(())
    }

    fn invalid(&self, value: &str, reason: impl fmt::Display) -> ConfigError {
        ConfigError::InvalidValue {
            key: self.name(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    fn parse<T>(&self, value: &str) -> ConfigResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        value.parse().map_err(|e| self.invalid(value, e))
    }

    fn parse_positive(&self, value: &str) -> ConfigResult<u64> {
        match self.parse::<u64>(value)? {
            0 => Err(self.invalid(value, "must be greater than zero")),
            n => Ok(n),
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section(), self.key_name())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ALL_KEYS
            .iter()
            .copied()
            .find(|k| k.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

fn path_string(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}

fn optional_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}
