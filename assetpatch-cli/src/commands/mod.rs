//! CLI command implementations and shared helpers.

pub mod cache;
pub mod config;
pub mod inspect;
pub mod update;
pub mod verify;

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use assetpatch::config::{ConfigFile, PackageConfig};
use assetpatch::operation::{AsyncOperation, OperationStatus};
use assetpatch::package::AssetsPackage;
use assetpatch::playmode::PlayModeKind;

use crate::error::CliError;

/// Tick interval while driving operations from the CLI.
const TICK: Duration = Duration::from_millis(10);

/// Package selection shared by package-level commands.
///
/// Anything not given here comes from `config.ini`.
#[derive(Debug, Clone, Args)]
pub struct PackageArgs {
    /// Package name
    #[arg(short, long)]
    pub package: Option<String>,

    /// Play mode: host, offline or simulate
    #[arg(long)]
    pub mode: Option<String>,

    /// Cache root directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Built-in content directory
    #[arg(long)]
    pub builtin_dir: Option<PathBuf>,

    /// Asset source tree for simulate mode
    #[arg(long)]
    pub simulate_dir: Option<PathBuf>,

    /// Main server URL
    #[arg(long)]
    pub remote: Option<String>,

    /// Fallback server URL
    #[arg(long)]
    pub fallback: Option<String>,
}

/// Load config or return default.
pub fn load_config() -> ConfigFile {
    ConfigFile::load().unwrap_or_default()
}

/// Merge CLI overrides over `config.ini`.
pub fn package_config(args: &PackageArgs) -> Result<PackageConfig, CliError> {
    let file = load_config();
    let mut config = file.to_package_config();

    // CLI takes precedence, then config
    if let Some(name) = &args.package {
        config.package_name = name.clone();
    }
    if let Some(mode) = &args.mode {
        config.play_mode = mode.parse::<PlayModeKind>().map_err(CliError::Config)?;
    }
    if let Some(dir) = &args.cache_dir {
        config.cache_root = dir.clone();
    }
    if let Some(dir) = &args.builtin_dir {
        config.builtin_root = Some(dir.clone());
    }
    if let Some(dir) = &args.simulate_dir {
        config.simulate_root = Some(dir.clone());
    }
    if let Some(url) = &args.remote {
        config.main_url = url.clone();
    }
    if let Some(url) = &args.fallback {
        config.fallback_url = url.clone();
    }
    Ok(config)
}

pub fn open_package(config: PackageConfig) -> Result<AssetsPackage, CliError> {
    Ok(AssetsPackage::new(config)?)
}

/// Drive an operation to completion behind a spinner.
pub fn run_with_spinner<O: AsyncOperation>(
    name: &'static str,
    message: &str,
    op: &mut O,
) -> Result<(), CliError> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));

    while !op.is_done() {
        op.update();
        if !op.is_done() {
            thread::sleep(TICK);
        }
    }
    spinner.finish_and_clear();

    match op.status() {
        OperationStatus::Succeed => Ok(()),
        _ => Err(CliError::Operation {
            name,
            reason: op.error().unwrap_or("unknown error").to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args() -> PackageArgs {
        PackageArgs {
            package: None,
            mode: None,
            cache_dir: None,
            builtin_dir: None,
            simulate_dir: None,
            remote: None,
            fallback: None,
        }
    }

    #[test]
    fn test_overrides_take_precedence() {
        let dir = TempDir::new().unwrap();
        let mut a = args();
        a.package = Some("Levels".to_string());
        a.mode = Some("offline".to_string());
        a.cache_dir = Some(dir.path().to_path_buf());
        a.remote = Some("http://main/cdn".to_string());
        a.fallback = Some("http://backup/cdn".to_string());

        let config = package_config(&a).unwrap();
        assert_eq!(config.package_name, "Levels");
        assert_eq!(config.play_mode, PlayModeKind::Offline);
        assert_eq!(config.cache_root, dir.path());
        assert_eq!(config.main_url, "http://main/cdn");
        assert_eq!(config.fallback_url, "http://backup/cdn");
    }

    #[test]
    fn test_invalid_mode_is_config_error() {
        let mut a = args();
        a.mode = Some("editor".to_string());
        assert!(matches!(package_config(&a), Err(CliError::Config(_))));
    }
}
