use std::sync::Arc;

use super::{unique_by_content, BuiltinSlot, BundleInfo, LoadSource, PlayMode, PlayModeKind};
use crate::bundle::PatchBundle;
use crate::cache::CacheSystem;
use crate::manifest::{PatchManifest, ResolveError};
use crate::update::RemoteServices;

/// Cache first, then built-in content, then the remote server.
#[derive(Debug)]
pub struct HostPlayMode {
    cache: Arc<CacheSystem>,
    builtin: BuiltinSlot,
    remote: Arc<RemoteServices>,
    include_untagged_bundles: bool,
}

impl HostPlayMode {
    pub fn new(
        cache: Arc<CacheSystem>,
        builtin: BuiltinSlot,
        remote: Arc<RemoteServices>,
        include_untagged_bundles: bool,
    ) -> Self {
        Self {
            cache,
            builtin,
            remote,
            include_untagged_bundles,
        }
    }

    pub fn remote(&self) -> &RemoteServices {
        &self.remote
    }

    fn is_builtin(&self, bundle: &PatchBundle) -> bool {
        self.builtin.contains(bundle)
    }

    /// Neither cached nor shipped with the application.
    fn needs_download(&self, bundle: &PatchBundle) -> bool {
        !self.cache.is_bundle_cached(bundle) && !self.is_builtin(bundle)
    }

    fn needs_unpack(&self, bundle: &PatchBundle) -> bool {
        self.is_builtin(bundle) && !self.cache.is_bundle_cached(bundle)
    }

    fn wanted_by_tags(&self, bundle: &PatchBundle, tags: &[String]) -> bool {
        bundle.has_tag(tags) || (self.include_untagged_bundles && !bundle.has_any_tags())
    }

    fn remote_info(&self, bundle: &PatchBundle) -> BundleInfo {
        let mut info = BundleInfo::new(bundle.clone(), LoadSource::Remote);
        info.remote_main_url = Some(self.remote.main_file_url(bundle.file_name()));
        info.remote_fallback_url = Some(self.remote.fallback_file_url(bundle.file_name()));
        info
    }

    fn builtin_info(&self, bundle: &PatchBundle) -> BundleInfo {
        let mut info = BundleInfo::new(bundle.clone(), LoadSource::Builtin);
        info.builtin_path = self.builtin.bundle_path(bundle);
        info
    }
}

impl PlayMode for HostPlayMode {
    fn kind(&self) -> PlayModeKind {
        PlayModeKind::Host
    }

    fn resolve_bundle(&self, bundle: &PatchBundle) -> BundleInfo {
        if self.cache.is_bundle_cached(bundle) {
            let mut info = BundleInfo::new(bundle.clone(), LoadSource::Cache);
            info.cached_data_path = Some(self.cache.layout().bundle_data_path(bundle));
            return info;
        }
        if self.is_builtin(bundle) {
            return self.builtin_info(bundle);
        }
        self.remote_info(bundle)
    }

    fn download_list_by_all(&self, manifest: &PatchManifest) -> Vec<BundleInfo> {
        unique_by_content(&manifest.bundle_list, |b| self.needs_download(b))
            .into_iter()
            .map(|b| self.remote_info(b))
            .collect()
    }

    fn download_list_by_tags(&self, manifest: &PatchManifest, tags: &[String]) -> Vec<BundleInfo> {
        unique_by_content(&manifest.bundle_list, |b| {
            self.wanted_by_tags(b, tags) && self.needs_download(b)
        })
        .into_iter()
        .map(|b| self.remote_info(b))
        .collect()
    }

    fn download_list_by_paths(
        &self,
        manifest: &PatchManifest,
        asset_paths: &[String],
    ) -> Result<Vec<BundleInfo>, ResolveError> {
        let mut bundles = Vec::new();
        for path in asset_paths {
            bundles.push(manifest.main_bundle(path)?);
            bundles.extend(manifest.all_dependencies(path)?);
        }
        Ok(unique_by_content(bundles, |b| self.needs_download(b))
            .into_iter()
            .map(|b| self.remote_info(b))
            .collect())
    }

    fn unpack_list_by_all(&self, manifest: &PatchManifest) -> Vec<BundleInfo> {
        unique_by_content(&manifest.bundle_list, |b| self.needs_unpack(b))
            .into_iter()
            .map(|b| self.builtin_info(b))
            .collect()
    }

    fn unpack_list_by_tags(&self, manifest: &PatchManifest, tags: &[String]) -> Vec<BundleInfo> {
        unique_by_content(&manifest.bundle_list, |b| {
            self.wanted_by_tags(b, tags) && self.needs_unpack(b)
        })
        .into_iter()
        .map(|b| self.builtin_info(b))
        .collect()
    }
}
