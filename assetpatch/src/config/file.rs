//! INI configuration file.
//!
//! ```ini
//! [package]
//! name = DefaultPackage
//! play_mode = host
//!
//! [cache]
//! directory = ~/.cache/assetpatch
//!
//! [remote]
//! main_url = https://cdn.example.com/game/v1
//! fallback_url = https://backup.example.com/game/v1
//!
//! [download]
//! timeout = 60
//! ```
//!
//! Missing keys keep their defaults; unknown keys are ignored.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;

use super::error::{ConfigError, ConfigResult};
use super::package::{
    default_cache_root, PackageConfig, DEFAULT_PACKAGE_NAME, DEFAULT_VERIFY_MAX_CONCURRENCY,
};
use crate::cache::VerifyLevel;
use crate::download::{
    DEFAULT_BREAKPOINT_RESUME_FILE_SIZE, DEFAULT_CLEAR_FILE_RESPONSE_CODES,
    DEFAULT_DOWNLOADING_MAX_NUMBER, DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_FAILED_TRY_AGAIN,
    DEFAULT_TRY_AGAIN_DELAY,
};
use crate::logging::{LoggingConfig, DEFAULT_LOG_FILTER};
use crate::playmode::PlayModeKind;

/// `[package]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSettings {
    pub name: String,
    pub play_mode: PlayModeKind,
    pub builtin_dir: Option<PathBuf>,
    pub simulate_dir: Option<PathBuf>,
    pub location_to_lower: bool,
    pub include_untagged: bool,
}

/// `[cache]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub directory: PathBuf,
}

/// `[remote]`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteSettings {
    pub main_url: String,
    pub fallback_url: String,
}

/// `[download]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    /// Stall timeout in seconds.
    pub timeout: u64,
    pub retries: u32,
    /// Backoff between attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Bundles at least this large use break-resume; 0 disables.
    pub resume_size: u64,
    pub clear_codes: Vec<u16>,
    pub parallel: usize,
}

/// `[verify]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifySettings {
    pub level: VerifyLevel,
    pub threaded: bool,
    pub max_concurrency: usize,
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub filter: String,
    pub directory: Option<PathBuf>,
}

/// All settings persisted in `config.ini`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub package: PackageSettings,
    pub cache: CacheSettings,
    pub remote: RemoteSettings,
    pub download: DownloadSettings,
    pub verify: VerifySettings,
    pub logging: LoggingSettings,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            package: PackageSettings {
                name: DEFAULT_PACKAGE_NAME.to_string(),
                play_mode: PlayModeKind::default(),
                builtin_dir: None,
                simulate_dir: None,
                location_to_lower: false,
                include_untagged: true,
            },
            cache: CacheSettings {
                directory: default_cache_root(),
            },
            remote: RemoteSettings::default(),
            download: DownloadSettings {
                timeout: DEFAULT_DOWNLOAD_TIMEOUT.as_secs(),
                retries: DEFAULT_FAILED_TRY_AGAIN,
                retry_delay_ms: DEFAULT_TRY_AGAIN_DELAY.as_millis() as u64,
                resume_size: DEFAULT_BREAKPOINT_RESUME_FILE_SIZE,
                clear_codes: DEFAULT_CLEAR_FILE_RESPONSE_CODES.to_vec(),
                parallel: DEFAULT_DOWNLOADING_MAX_NUMBER,
            },
            verify: VerifySettings {
                level: VerifyLevel::default(),
                threaded: true,
                max_concurrency: DEFAULT_VERIFY_MAX_CONCURRENCY,
            },
            logging: LoggingSettings {
                filter: DEFAULT_LOG_FILTER.to_string(),
                directory: None,
            },
        }
    }
}

/// `{config_dir}/assetpatch`
pub fn config_directory() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("assetpatch"))
        .unwrap_or_else(|| PathBuf::from(".assetpatch"))
}

/// `{config_dir}/assetpatch/config.ini`
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

impl ConfigFile {
    /// Load from the default location, or defaults if there is no file.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&config_file_path())
    }

    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Write to the default location.
    pub fn save(&self) -> ConfigResult<()> {
        self.save_to(&config_file_path())
    }

    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::CreateDirFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        self.to_ini()
            .write_to_file(path)
            .map_err(|e| ConfigError::WriteFailed {
                path: path.to_path_buf(),
                source: e,
            })
    }

    fn from_ini(ini: &Ini) -> ConfigResult<Self> {
        let mut config = Self::default();
        for key in super::ConfigKey::all() {
            let value = ini
                .section(Some(key.section()))
                .and_then(|props| props.get(key.key_name()));
            if let Some(value) = value {
                key.set(&mut config, value)?;
            }
        }
        Ok(config)
    }

    fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        for key in super::ConfigKey::all() {
            let value = key.get(self);
            if !value.is_empty() {
                ini.with_section(Some(key.section())).set(key.key_name(), value);
            }
        }
        ini
    }

    /// Runtime configuration for the configured package.
    pub fn to_package_config(&self) -> PackageConfig {
        let mut config = PackageConfig::new(self.package.name.clone())
            .with_play_mode(self.package.play_mode)
            .with_cache_root(self.cache.directory.clone())
            .with_remote(self.remote.main_url.clone(), self.remote.fallback_url.clone())
            .with_verify_level(self.verify.level)
            .with_verify_threaded(self.verify.threaded)
            .with_verify_max_concurrency(self.verify.max_concurrency)
            .with_download_timeout(Duration::from_secs(self.download.timeout))
            .with_failed_try_again(self.download.retries)
            .with_try_again_delay(Duration::from_millis(self.download.retry_delay_ms))
            .with_breakpoint_resume_file_size(self.download.resume_size)
            .with_clear_file_response_codes(self.download.clear_codes.clone())
            .with_max_concurrent_downloads(self.download.parallel)
            .with_location_to_lower(self.package.location_to_lower)
            .with_include_untagged_bundles(self.package.include_untagged);
        if let Some(dir) = &self.package.builtin_dir {
            config = config.with_builtin_root(dir.clone());
        }
        if let Some(dir) = &self.package.simulate_dir {
            config = config.with_simulate_root(dir.clone());
        }
        config
    }

    pub fn to_logging_config(&self) -> LoggingConfig {
        let mut config = LoggingConfig::default().with_filter(self.logging.filter.clone());
        if let Some(dir) = &self.logging.directory {
            config = config.with_directory(dir.clone());
        }
        config
    }
}

/// Human-readable byte size.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
