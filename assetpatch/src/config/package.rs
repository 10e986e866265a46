//! Runtime configuration of one asset package.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::VerifyLevel;
use crate::download::{DownloaderOptions, DEFAULT_DOWNLOADING_MAX_NUMBER};
use crate::manifest::DEFAULT_RECORDS_PER_STEP;
use crate::playmode::PlayModeKind;

/// Package name used when none is configured.
pub const DEFAULT_PACKAGE_NAME: &str = "DefaultPackage";

/// Upper bound on concurrent cache verifications.
pub const DEFAULT_VERIFY_MAX_CONCURRENCY: usize = 32;

/// Everything an [`AssetsPackage`](crate::package::AssetsPackage) needs.
#[derive(Debug, Clone)]
pub struct PackageConfig {
    pub package_name: String,
    pub play_mode: PlayModeKind,

    /// Root of the sandbox cache.
    pub cache_root: PathBuf,

    /// Root of content shipped with the application, if any.
    pub builtin_root: Option<PathBuf>,

    /// Source tree read directly in simulate mode.
    pub simulate_root: Option<PathBuf>,

    pub main_url: String,

    /// Empty means the main URL is reused.
    pub fallback_url: String,

    pub verify_level: VerifyLevel,

    /// Verify on a worker pool instead of the driving thread.
    pub verify_threaded: bool,

    pub verify_max_concurrency: usize,

    pub downloader: DownloaderOptions,

    pub max_concurrent_downloads: usize,

    /// Lowercase locations before lookup.
    pub location_to_lower: bool,

    /// Manifest records decoded per update tick.
    pub records_per_step: usize,

    /// Untagged bundles join every tag-filtered download list.
    pub include_untagged_bundles: bool,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            package_name: DEFAULT_PACKAGE_NAME.to_string(),
            play_mode: PlayModeKind::default(),
            cache_root: default_cache_root(),
            builtin_root: None,
            simulate_root: None,
            main_url: String::new(),
            fallback_url: String::new(),
            verify_level: VerifyLevel::default(),
            verify_threaded: true,
            verify_max_concurrency: DEFAULT_VERIFY_MAX_CONCURRENCY,
            downloader: DownloaderOptions::default(),
            max_concurrent_downloads: DEFAULT_DOWNLOADING_MAX_NUMBER,
            location_to_lower: false,
            records_per_step: DEFAULT_RECORDS_PER_STEP,
            include_untagged_bundles: true,
        }
    }
}

impl PackageConfig {
    /// Create a configuration for the named package.
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            ..Default::default()
        }
    }

    pub fn with_play_mode(mut self, mode: PlayModeKind) -> Self {
        self.play_mode = mode;
        self
    }

    pub fn with_cache_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_root = path.into();
        self
    }

    pub fn with_builtin_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.builtin_root = Some(path.into());
        self
    }

    pub fn with_simulate_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.simulate_root = Some(path.into());
        self
    }

    /// Set the main and fallback server URLs.
    pub fn with_remote(
        mut self,
        main_url: impl Into<String>,
        fallback_url: impl Into<String>,
    ) -> Self {
        self.main_url = main_url.into();
        self.fallback_url = fallback_url.into();
        self
    }

    pub fn with_verify_level(mut self, level: VerifyLevel) -> Self {
        self.verify_level = level;
        self
    }

    pub fn with_verify_threaded(mut self, threaded: bool) -> Self {
        self.verify_threaded = threaded;
        self
    }

    pub fn with_verify_max_concurrency(mut self, max: usize) -> Self {
        self.verify_max_concurrency = max;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.downloader.timeout = timeout;
        self
    }

    pub fn with_failed_try_again(mut self, attempts: u32) -> Self {
        self.downloader.failed_try_again = attempts;
        self
    }

    pub fn with_try_again_delay(mut self, delay: Duration) -> Self {
        self.downloader.try_again_delay = delay;
        self
    }

    pub fn with_breakpoint_resume_file_size(mut self, size: u64) -> Self {
        self.downloader.breakpoint_resume_file_size = size;
        self
    }

    pub fn with_clear_file_response_codes(mut self, codes: Vec<u16>) -> Self {
        self.downloader.clear_file_response_codes = codes;
        self
    }

    pub fn with_max_concurrent_downloads(mut self, max: usize) -> Self {
        self.max_concurrent_downloads = max;
        self
    }

    pub fn with_location_to_lower(mut self, lower: bool) -> Self {
        self.location_to_lower = lower;
        self
    }

    pub fn with_records_per_step(mut self, records: usize) -> Self {
        self.records_per_step = records;
        self
    }

    pub fn with_include_untagged_bundles(mut self, include: bool) -> Self {
        self.include_untagged_bundles = include;
        self
    }
}

/// `{cache_dir}/assetpatch`, or a relative directory when the platform has none.
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("assetpatch"))
        .unwrap_or_else(|| PathBuf::from(".assetpatch-cache"))
}
