//! assetpatch - versioned content bundle delivery
//!
//! Resolves logical asset locations to content bundles through a versioned
//! manifest, keeps a content-addressed on-disk cache of those bundles honest,
//! and fetches what is missing with resumable, retrying downloads.
//!
//! The main entry point is [`package::AssetsPackage`]. Every long-running
//! piece of work is an [`operation::AsyncOperation`] that the host ticks from
//! its own loop.

pub mod bundle;
pub mod cache;
pub mod checksum;
pub mod config;
pub mod download;
pub mod logging;
pub mod manifest;
pub mod operation;
pub mod package;
pub mod playmode;
pub mod update;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
