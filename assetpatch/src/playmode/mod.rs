//! Play-mode policy: where a bundle is loaded from and what must be fetched.
//!
//! Each [`PlayMode`] implementation answers the same questions against the
//! active manifest. Host mode resolves cache, then built-in content, then
//! the remote server; offline mode never reaches the network; simulate mode
//! reads assets straight from a source tree and never downloads anything.

mod host;
mod offline;
mod simulate;

pub use host::HostPlayMode;
pub use offline::OfflinePlayMode;
pub use simulate::SimulatePlayMode;

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::bundle::PatchBundle;
use crate::cache::BuiltinLayout;
use crate::download::DownloadRequest;
use crate::manifest::{PatchManifest, ResolveError};

/// Where a bundle will be loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadSource {
    Cache,
    Builtin,
    Remote,
    Simulated,
}

impl fmt::Display for LoadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cache => "cache",
            Self::Builtin => "builtin",
            Self::Remote => "remote",
            Self::Simulated => "simulated",
        };
        write!(f, "{}", name)
    }
}

/// Which play-mode a package runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayModeKind {
    Simulate,
    Offline,
    #[default]
    Host,
}

impl FromStr for PlayModeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simulate" => Ok(Self::Simulate),
            "offline" => Ok(Self::Offline),
            "host" => Ok(Self::Host),
            other => Err(format!("unknown play mode '{}'", other)),
        }
    }
}

impl fmt::Display for PlayModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulate => write!(f, "simulate"),
            Self::Offline => write!(f, "offline"),
            Self::Host => write!(f, "host"),
        }
    }
}

/// A bundle resolved to a concrete load source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleInfo {
    pub bundle: PatchBundle,
    pub source: LoadSource,
    pub cached_data_path: Option<PathBuf>,
    pub builtin_path: Option<PathBuf>,
    pub remote_main_url: Option<String>,
    pub remote_fallback_url: Option<String>,
    pub simulated_path: Option<PathBuf>,
}

impl BundleInfo {
    pub fn new(bundle: PatchBundle, source: LoadSource) -> Self {
        Self {
            bundle,
            source,
            cached_data_path: None,
            builtin_path: None,
            remote_main_url: None,
            remote_fallback_url: None,
            simulated_path: None,
        }
    }

    /// Request fetching this bundle from the remote server.
    pub fn download_request(&self) -> Option<DownloadRequest> {
        let main = self.remote_main_url.as_ref()?;
        let fallback = self.remote_fallback_url.as_ref().unwrap_or(main);
        Some(DownloadRequest::new(self.bundle.clone(), main, fallback))
    }

    /// Request copying this bundle from built-in content into the cache.
    pub fn unpack_request(&self) -> Option<DownloadRequest> {
        let path = self.builtin_path.as_ref()?.to_string_lossy().into_owned();
        Some(DownloadRequest::new(self.bundle.clone(), path.clone(), path))
    }
}

/// Content shipped with the application.
#[derive(Debug, Clone)]
pub struct BuiltinPayload {
    layout: BuiltinLayout,
    cache_guids: HashSet<String>,
}

impl BuiltinPayload {
    pub fn new(layout: BuiltinLayout, cache_guids: HashSet<String>) -> Self {
        Self {
            layout,
            cache_guids,
        }
    }

    /// Everything listed in the built-in manifest.
    pub fn from_manifest(layout: BuiltinLayout, manifest: &PatchManifest) -> Self {
        let cache_guids = manifest
            .bundle_list
            .iter()
            .map(|b| b.cache_guid().to_string())
            .collect();
        Self::new(layout, cache_guids)
    }

    pub fn layout(&self) -> &BuiltinLayout {
        &self.layout
    }

    pub fn contains(&self, bundle: &PatchBundle) -> bool {
        self.cache_guids.contains(bundle.cache_guid())
    }

    pub fn len(&self) -> usize {
        self.cache_guids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache_guids.is_empty()
    }
}

/// Built-in payload shared between a play mode and the initializer.
///
/// Empty until the built-in manifest has been loaded.
#[derive(Debug, Clone, Default)]
pub struct BuiltinSlot(Arc<RwLock<Option<BuiltinPayload>>>);

impl BuiltinSlot {
    pub fn new(payload: Option<BuiltinPayload>) -> Self {
        Self(Arc::new(RwLock::new(payload)))
    }

    pub fn set(&self, payload: BuiltinPayload) {
        *self.0.write() = Some(payload);
    }

    pub fn is_loaded(&self) -> bool {
        self.0.read().is_some()
    }

    pub fn contains(&self, bundle: &PatchBundle) -> bool {
        self.0
            .read()
            .as_ref()
            .map(|p| p.contains(bundle))
            .unwrap_or(false)
    }

    /// Where the bundle would live in the built-in payload.
    pub fn bundle_path(&self, bundle: &PatchBundle) -> Option<PathBuf> {
        self.0.read().as_ref().map(|p| p.layout().bundle_path(bundle))
    }
}

/// Resolution and download-list policy for one package.
pub trait PlayMode: Send + Sync + fmt::Debug {
    fn kind(&self) -> PlayModeKind;

    /// Resolve one bundle to its load source.
    fn resolve_bundle(&self, bundle: &PatchBundle) -> BundleInfo;

    /// Resolve the bundle owning `asset_path`.
    fn bundle_info(
        &self,
        manifest: &PatchManifest,
        asset_path: &str,
    ) -> Result<BundleInfo, ResolveError> {
        Ok(self.resolve_bundle(manifest.main_bundle(asset_path)?))
    }

    /// Resolve every dependency bundle of `asset_path`.
    fn all_dependencies(
        &self,
        manifest: &PatchManifest,
        asset_path: &str,
    ) -> Result<Vec<BundleInfo>, ResolveError> {
        Ok(manifest
            .all_dependencies(asset_path)?
            .into_iter()
            .map(|b| self.resolve_bundle(b))
            .collect())
    }

    /// Every bundle that still needs network transfer.
    fn download_list_by_all(&self, _manifest: &PatchManifest) -> Vec<BundleInfo> {
        Vec::new()
    }

    /// Bundles carrying any of `tags` (plus untagged ones when enabled).
    fn download_list_by_tags(
        &self,
        _manifest: &PatchManifest,
        _tags: &[String],
    ) -> Vec<BundleInfo> {
        Vec::new()
    }

    /// Main and dependency bundles of the given assets.
    fn download_list_by_paths(
        &self,
        _manifest: &PatchManifest,
        _asset_paths: &[String],
    ) -> Result<Vec<BundleInfo>, ResolveError> {
        Ok(Vec::new())
    }

    /// Built-in bundles not yet copied into the cache.
    fn unpack_list_by_all(&self, _manifest: &PatchManifest) -> Vec<BundleInfo> {
        Vec::new()
    }

    fn unpack_list_by_tags(&self, _manifest: &PatchManifest, _tags: &[String]) -> Vec<BundleInfo> {
        Vec::new()
    }
}

/// Keep the first bundle per cache GUID that passes `keep`.
pub(crate) fn unique_by_content<'a, I, F>(bundles: I, mut keep: F) -> Vec<&'a PatchBundle>
where
    I: IntoIterator<Item = &'a PatchBundle>,
    F: FnMut(&PatchBundle) -> bool,
{
    let mut seen = HashSet::new();
    bundles
        .into_iter()
        .filter(|b| keep(*b) && seen.insert(b.cache_guid().to_string()))
        .collect()
}
