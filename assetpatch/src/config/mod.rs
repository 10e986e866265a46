//! Configuration.
//!
//! [`PackageConfig`] is the in-memory builder a package is created from.
//! [`ConfigFile`] persists the same knobs as INI at [`config_file_path`] and
//! converts into a [`PackageConfig`]; [`ConfigKey`] addresses single settings
//! for the CLI's get/set/list commands.

mod error;
mod file;
mod keys;
mod package;

pub use error::{ConfigError, ConfigResult};
pub use file::{
    config_directory, config_file_path, format_size, CacheSettings, ConfigFile, DownloadSettings,
    LoggingSettings, PackageSettings, RemoteSettings, VerifySettings,
};
pub use keys::ConfigKey;
pub use package::{
    default_cache_root, PackageConfig, DEFAULT_PACKAGE_NAME, DEFAULT_VERIFY_MAX_CONCURRENCY,
};
