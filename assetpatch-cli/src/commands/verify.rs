//! Verify command - scan the cache and drop anything that fails verification.

use assetpatch::config::format_size;

use super::{open_package, package_config, run_with_spinner, PackageArgs};
use crate::error::CliError;

pub fn run(args: &PackageArgs, sync: bool) -> Result<(), CliError> {
    let config = package_config(args)?.with_verify_threaded(!sync);
    let package = open_package(config)?;

    let mut init = package.initialize();
    run_with_spinner("Initialize", "Verifying cache...", &mut init)?;

    let stats = package.cache_stats();
    println!("Package:   {} ({})", package.package_name(), package.play_mode());
    println!(
        "Version:   {}",
        package.package_version().unwrap_or_else(|| "(none)".to_string())
    );
    println!("Verified:  {}", init.verified_count());
    println!("Removed:   {}", init.removed_count());
    println!("Cached:    {} files, {}", stats.files, format_size(stats.bytes));
    Ok(())
}
