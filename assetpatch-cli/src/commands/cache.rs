//! Cache management commands.

use assetpatch::config::format_size;
use clap::Subcommand;

use super::{open_package, package_config, run_with_spinner, PackageArgs};
use crate::error::CliError;

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum CacheAction {
    /// Show cached file count and size
    Stats,

    /// Delete every cached file of the package
    Clear,

    /// Delete cached files the active manifest no longer references
    ClearUnused,
}

pub fn run(args: &PackageArgs, action: CacheAction) -> Result<(), CliError> {
    let package = open_package(package_config(args)?)?;

    let mut init = package.initialize();
    run_with_spinner("Initialize", "Scanning cache...", &mut init)?;

    match action {
        CacheAction::Stats => {
            let stats = package.cache_stats();
            println!("Package:  {}", package.package_name());
            println!("Root:     {}", package.config().cache_root.display());
            println!("Files:    {}", stats.files);
            println!("Size:     {}", format_size(stats.bytes));
        }
        CacheAction::Clear => {
            let mut op = package.clear_all_cache_files();
            run_with_spinner("Clear cache", "Clearing cache...", &mut op)?;
            println!("Removed {} cached files", op.cleared_count());
        }
        CacheAction::ClearUnused => {
            let mut op = package.clear_unused_cache_files()?;
            run_with_spinner("Clear unused cache", "Clearing unused files...", &mut op)?;
            println!("Removed {} unused files", op.cleared_count());
        }
    }
    Ok(())
}
