//! Update command - pull the latest version and download its bundles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use assetpatch::config::format_size;
use assetpatch::operation::{AsyncOperation, OperationStatus};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use super::{open_package, package_config, run_with_spinner, PackageArgs};
use crate::error::CliError;

pub fn run(args: &PackageArgs, tags: &[String], bust_cache: bool) -> Result<(), CliError> {
    let package = open_package(package_config(args)?)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::SeqCst);
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let mut init = package.initialize();
    run_with_spinner("Initialize", "Verifying cache...", &mut init)?;
    let previous = package.package_version();

    let mut version_op = package.update_package_version(bust_cache);
    run_with_spinner("Version request", "Requesting package version...", &mut version_op)?;
    let version = version_op
        .package_version()
        .map(str::to_string)
        .ok_or_else(|| CliError::Operation {
            name: "Version request",
            reason: "no version returned".to_string(),
        })?;

    let mut manifest_op = package.update_package_manifest(version.clone());
    run_with_spinner("Manifest update", "Updating manifest...", &mut manifest_op)?;

    info!(
        package = package.package_name(),
        version = %version,
        from_cache = manifest_op.from_cache(),
        "Manifest updated"
    );

    let name = package.package_name();
    match previous {
        Some(prev) if prev == version => println!("Package {} is at {}", name, version),
        Some(prev) => println!("Package {}: {} -> {}", name, prev, version),
        None => println!("Package {}: {}", name, version),
    }

    let mut downloader = if tags.is_empty() {
        package.create_patch_downloader_by_all()?
    } else {
        package.create_patch_downloader_by_tags(tags)?
    };

    if downloader.total_download_count() == 0 {
        println!("All bundles are up to date");
        return Ok(());
    }

    println!(
        "Downloading {} bundles ({})",
        downloader.total_download_count(),
        format_size(downloader.total_download_bytes())
    );

    let bar = ProgressBar::new(downloader.total_download_bytes());
    bar.set_style(
        ProgressStyle::with_template(
            "{bar:40.cyan/blue} {bytes}/{total_bytes} {msg} [{elapsed_precise}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let bar_clone = bar.clone();
    let mut downloader = downloader.on_progress(move |p| {
        bar_clone.set_position(p.current_bytes);
        bar_clone.set_message(format!("{}/{} bundles", p.current_count, p.total_count));
    });

    downloader.begin_download();
    while !downloader.is_done() {
        if interrupted.load(Ordering::SeqCst) {
            warn!("Download interrupted");
            downloader.cancel();
            bar.abandon_with_message("interrupted");
            return Err(CliError::Interrupted);
        }
        package.update();
        downloader.update();
        thread::sleep(Duration::from_millis(10));
    }

    match downloader.status() {
        OperationStatus::Succeed => {
            bar.finish_with_message("done");
            Ok(())
        }
        _ => {
            bar.abandon();
            for failed in downloader.failed() {
                eprintln!("  {}: {}", failed.bundle_name, failed.error);
            }
            Err(CliError::Operation {
                name: "Download",
                reason: downloader.error().unwrap_or("unknown error").to_string(),
            })
        }
    }
}
