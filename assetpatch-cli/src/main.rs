//! assetpatch CLI
//!
//! Inspect manifests, verify and clear the local cache, pull the latest
//! version of a package and manage `config.ini`.

mod commands;
mod error;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use assetpatch::config::ConfigFile;
use assetpatch::logging::{init_logging, LoggingGuard};
use commands::cache::CacheAction;
use commands::config::ConfigCommands;
use error::CliError;

#[derive(Debug, Parser)]
#[command(
    name = "assetpatch",
    version = assetpatch::VERSION,
    about = "Versioned content bundle delivery"
)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Decode a manifest file and print a summary
    Inspect {
        /// Path to a PatchManifest_*.bytes file
        manifest: String,

        /// Print the full manifest as JSON
        #[arg(long)]
        json: bool,
    },

    /// Scan and verify the local cache of a package
    Verify {
        #[command(flatten)]
        package: commands::PackageArgs,

        /// Verify on the calling thread instead of a worker pool
        #[arg(long)]
        sync: bool,
    },

    /// Update a package to the latest remote version and download bundles
    Update {
        #[command(flatten)]
        package: commands::PackageArgs,

        /// Only download bundles carrying these tags (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Add a cache-busting query to the version request
        #[arg(long)]
        bust_cache: bool,
    },

    /// Cache management
    Cache {
        #[command(flatten)]
        package: commands::PackageArgs,

        #[command(subcommand)]
        action: CacheAction,
    },

    /// View or modify config.ini
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn setup_logging(verbose: bool) -> Result<LoggingGuard, CliError> {
    let config = ConfigFile::load().unwrap_or_default();
    let mut logging = config.to_logging_config();
    if verbose {
        logging = logging.with_filter("assetpatch=debug");
    }
    Ok(init_logging(&logging)?)
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Inspect { manifest, json } => commands::inspect::run(&manifest, json),
        Commands::Verify { package, sync } => commands::verify::run(&package, sync),
        Commands::Update {
            package,
            tags,
            bust_cache,
        } => commands::update::run(&package, &tags, bust_cache),
        Commands::Cache { package, action } => commands::cache::run(&package, action),
        Commands::Config { command } => commands::config::run(command),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match setup_logging(cli.verbose) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: {}", e);
            None
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", console::style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
