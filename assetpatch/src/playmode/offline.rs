use std::sync::Arc;

use super::{BuiltinSlot, BundleInfo, LoadSource, PlayMode, PlayModeKind};
use crate::bundle::PatchBundle;
use crate::cache::CacheSystem;

/// Cache, then built-in content. Never downloads.
#[derive(Debug)]
pub struct OfflinePlayMode {
    cache: Arc<CacheSystem>,
    builtin: BuiltinSlot,
}

impl OfflinePlayMode {
    pub fn new(cache: Arc<CacheSystem>, builtin: BuiltinSlot) -> Self {
        Self { cache, builtin }
    }
}

impl PlayMode for OfflinePlayMode {
    fn kind(&self) -> PlayModeKind {
        PlayModeKind::Offline
    }

    /// Bundles missing from the cache are expected in the built-in payload.
    fn resolve_bundle(&self, bundle: &PatchBundle) -> BundleInfo {
        if self.cache.is_bundle_cached(bundle) {
            let mut info = BundleInfo::new(bundle.clone(), LoadSource::Cache);
            info.cached_data_path = Some(self.cache.layout().bundle_data_path(bundle));
            return info;
        }
        let mut info = BundleInfo::new(bundle.clone(), LoadSource::Builtin);
        info.builtin_path = self.builtin.bundle_path(bundle);
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BuiltinLayout, CacheLayout};
    use crate::manifest::test_support::sample_manifest;
    use crate::playmode::BuiltinPayload;
    use tempfile::TempDir;

    #[test]
    fn test_offline_never_downloads() {
        let dir = TempDir::new().unwrap();
        let manifest = sample_manifest(false);
        let cache = Arc::new(CacheSystem::new(CacheLayout::new(dir.path())));
        let builtin = BuiltinPayload::from_manifest(BuiltinLayout::new("/app"), &manifest);
        let mode = OfflinePlayMode::new(cache, BuiltinSlot::new(Some(builtin)));

        assert!(mode.download_list_by_all(&manifest).is_empty());
        assert!(mode.unpack_list_by_all(&manifest).is_empty());
        assert!(mode
            .download_list_by_paths(&manifest, &["Assets/UI/MainMenu.prefab".to_string()])
            .unwrap()
            .is_empty());

        let info = mode.bundle_info(&manifest, "Assets/UI/MainMenu.prefab").unwrap();
        assert_eq!(info.source, LoadSource::Builtin);
        assert_eq!(
            info.builtin_path.unwrap(),
            std::path::PathBuf::from("/app/DefaultPackage/bb22.bundle")
        );
        assert_eq!(mode.kind(), PlayModeKind::Offline);
    }
}
