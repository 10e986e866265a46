//! Cache eviction operations.

use std::sync::Arc;

use tracing::info;

use super::system::{delete_file_root, CacheSystem};
use crate::manifest::PatchManifest;
use crate::operation::{AsyncOperation, OperationStatus};

/// Entries discarded per update.
pub const CLEAR_FILES_PER_STEP: usize = 32;

/// Which entries a clear operation removes.
#[derive(Debug, Clone)]
pub enum ClearMode {
    /// Entries not referenced by this manifest.
    Unused(Arc<PatchManifest>),
    /// Everything cached for the package.
    All,
}

/// Discard cache entries in batches.
#[derive(Debug)]
pub struct ClearCacheFilesOperation {
    system: Arc<CacheSystem>,
    package: String,
    mode: ClearMode,
    pending: Option<Vec<String>>,
    total: usize,
    cleared: usize,
    status: OperationStatus,
}

impl ClearCacheFilesOperation {
    pub fn new(system: Arc<CacheSystem>, package: impl Into<String>, mode: ClearMode) -> Self {
        Self {
            system,
            package: package.into(),
            mode,
            pending: None,
            total: 0,
            cleared: 0,
            status: OperationStatus::None,
        }
    }

    /// Clear entries the manifest no longer references.
    pub fn unused(
        system: Arc<CacheSystem>,
        package: impl Into<String>,
        manifest: Arc<PatchManifest>,
    ) -> Self {
        Self::new(system, package, ClearMode::Unused(manifest))
    }

    pub fn all(system: Arc<CacheSystem>, package: impl Into<String>) -> Self {
        Self::new(system, package, ClearMode::All)
    }

    pub fn cleared_count(&self) -> usize {
        self.cleared
    }

    fn collect(&self) -> Vec<String> {
        let guids = self.system.cached_guids(&self.package);
        match &self.mode {
            ClearMode::Unused(manifest) => guids
                .into_iter()
                .filter(|guid| !manifest.is_include_bundle_file(guid))
                .collect(),
            ClearMode::All => guids,
        }
    }

    fn is_raw(&self, guid: &str) -> bool {
        self.system
            .record_of(&self.package, guid)
            .map(|r| {
                r.data_file_path
                    .starts_with(self.system.layout().files_root(&self.package, true))
            })
            .unwrap_or(false)
    }
}

impl AsyncOperation for ClearCacheFilesOperation {
    fn update(&mut self) {
        if self.status.is_done() {
            return;
        }

        if self.pending.is_none() {
            let pending = self.collect();
            self.total = pending.len();
            self.pending = Some(pending);
            self.status = OperationStatus::Processing;
            return;
        }

        let mut batch = Vec::with_capacity(CLEAR_FILES_PER_STEP);
        if let Some(pending) = self.pending.as_mut() {
            for _ in 0..CLEAR_FILES_PER_STEP {
                match pending.pop() {
                    Some(guid) => batch.push(guid),
                    None => break,
                }
            }
        }
        for guid in batch {
            let is_raw = self.is_raw(&guid);
            self.system.discard(&self.package, &guid, is_raw);
            self.cleared += 1;
        }

        if self.pending.as_ref().map_or(true, Vec::is_empty) {
            if matches!(self.mode, ClearMode::All) {
                // Also sweep entries that never made it into the index
                let layout = self.system.layout();
                delete_file_root(&layout.files_root(&self.package, false));
                delete_file_root(&layout.files_root(&self.package, true));
                self.system.clear_package_index(&self.package);
            }
            info!(package = %self.package, cleared = self.cleared, "Cache files cleared");
            self.status = OperationStatus::Succeed;
        }
    }

    fn status(&self) -> OperationStatus {
        self.status
    }

    fn progress(&self) -> f32 {
        if self.status.is_done() {
            return 1.0;
        }
        if self.total == 0 {
            return 0.0;
        }
        self.cleared as f32 / self.total as f32
    }

    fn error(&self) -> Option<&str> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{OutputNameStyle, PatchBundle};
    use crate::cache::layout::CacheLayout;
    use crate::checksum::{crc32, format_crc};
    use crate::manifest::test_support::sample_manifest;
    use std::fs;
    use tempfile::TempDir;

    fn commit(system: &CacheSystem, hash: &str, is_raw: bool) -> PatchBundle {
        let data = hash.as_bytes();
        let crc = format_crc(crc32(data));
        let mut bundle =
            PatchBundle::new("x.bundle", hash, crc, data.len() as u64).with_raw_file(is_raw);
        bundle.parse_bundle("DefaultPackage", OutputNameStyle::HashName);
        let temp = system.layout().bundle_temp_path(&bundle);
        fs::create_dir_all(temp.parent().unwrap()).unwrap();
        fs::write(&temp, data).unwrap();
        system.commit_temp_file(&bundle).unwrap();
        bundle
    }

    #[test]
    fn test_clear_unused_keeps_referenced() {
        let dir = TempDir::new().unwrap();
        let system = Arc::new(CacheSystem::new(CacheLayout::new(dir.path())));
        let used = commit(&system, "aa11", false);
        let stale = commit(&system, "ee55", false);
        let stale_raw = commit(&system, "ff66", true);

        let manifest = Arc::new(sample_manifest(false));
        let mut op = ClearCacheFilesOperation::unused(system.clone(), "DefaultPackage", manifest);
        op.wait_for_async_complete();

        assert_eq!(op.status(), OperationStatus::Succeed);
        assert_eq!(op.cleared_count(), 2);
        assert!(system.is_bundle_cached(&used));
        assert!(!system.is_bundle_cached(&stale));
        assert!(!system.layout().bundle_file_root(&stale).exists());
        assert!(!system.layout().bundle_file_root(&stale_raw).exists());
    }

    #[test]
    fn test_clear_all() {
        let dir = TempDir::new().unwrap();
        let system = Arc::new(CacheSystem::new(CacheLayout::new(dir.path())));
        let a = commit(&system, "aa11", false);
        commit(&system, "ff66", true);

        let mut op = ClearCacheFilesOperation::all(system.clone(), "DefaultPackage");
        op.wait_for_async_complete();

        assert_eq!(op.cleared_count(), 2);
        assert!(!system.is_bundle_cached(&a));
        assert!(system.cached_guids("DefaultPackage").is_empty());
        assert!(!system.layout().files_root("DefaultPackage", false).exists());
        assert_eq!(op.progress(), 1.0);
    }

    #[test]
    fn test_clear_empty_cache() {
        let dir = TempDir::new().unwrap();
        let system = Arc::new(CacheSystem::new(CacheLayout::new(dir.path())));
        let mut op = ClearCacheFilesOperation::all(system, "DefaultPackage");
        op.wait_for_async_complete();
        assert_eq!(op.status(), OperationStatus::Succeed);
        assert_eq!(op.cleared_count(), 0);
    }
}
