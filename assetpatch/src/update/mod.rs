//! Package version updates.
//!
//! A package moves between manifests in three steps: fetch the remote
//! version string, fetch and check the manifest for that version, then adopt
//! it as the active manifest. Start-up uses [`InitializeOperation`] to adopt
//! whatever manifest is already on disk.

mod error;
mod fetch;
mod initialize;
mod manifest;
mod remote;
mod version;
mod version_file;

pub use error::{UpdateError, UpdateResult};
pub use initialize::{InitializeOperation, InitializeParameters};
pub use manifest::UpdatePackageManifestOperation;
pub use remote::RemoteServices;
pub use version::UpdatePackageVersionOperation;
pub use version_file::{read_version_file, write_file_atomic, write_version_file};

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::manifest::PatchManifest;

/// Shared slot holding the manifest the package currently resolves against.
///
/// Readers clone the inner `Arc`, so an update swapping the manifest never
/// invalidates a manifest someone is still iterating.
#[derive(Debug, Clone, Default)]
pub struct ActiveManifest {
    inner: Arc<RwLock<Option<Arc<PatchManifest>>>>,
}

impl ActiveManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<PatchManifest>> {
        self.inner.read().clone()
    }

    pub fn version(&self) -> Option<String> {
        self.inner
            .read()
            .as_ref()
            .map(|m| m.package_version.clone())
    }

    /// Replace the active manifest.
    pub fn set(&self, manifest: Arc<PatchManifest>) {
        info!(
            package = %manifest.package_name,
            version = %manifest.package_version,
            bundles = manifest.bundle_list.len(),
            "Adopted manifest"
        );
        *self.inner.write() = Some(manifest);
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }
}

/// Build the location mapping and check the owning package.
pub(crate) fn prepare_manifest(
    mut manifest: PatchManifest,
    package: &str,
    location_to_lower: bool,
) -> UpdateResult<PatchManifest> {
    if manifest.package_name != package {
        return Err(UpdateError::PackageMismatch {
            expected: package.to_string(),
            found: manifest.package_name,
        });
    }
    manifest.init_asset_path_mapping(location_to_lower)?;
    Ok(manifest)
}
