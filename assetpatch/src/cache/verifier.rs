//! Cache scanning and verification operations.
//!
//! Start-up runs [`FindCacheFilesOperation`] to discover entries on disk that
//! the index does not know about, then [`VerifyCacheFilesOperation`] to check
//! each of them. Verified entries are recorded; anything else is deleted so
//! that a half-written or corrupted entry never survives a restart.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::layout::{CACHE_DATA_FILE_NAME, CACHE_INFO_FILE_NAME};
use super::system::{delete_file_root, CacheSystem, RecordWrapper};
use super::verify::{
    VerifyCacheElement, VerifyExecutor, VerifyLevel, VerifyQueue, VerifyResult, VerifyTempElement,
};
use crate::operation::{AsyncOperation, OperationStatus};

/// Shard directories inspected per update while scanning.
pub const SHARD_DIRS_PER_STEP: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FindStep {
    None,
    ListShards,
    ScanShards,
    Done,
}

/// Scan a package's cache roots for entries not already indexed.
#[derive(Debug)]
pub struct FindCacheFilesOperation {
    system: Arc<CacheSystem>,
    package: String,
    step: FindStep,
    shards: Vec<(PathBuf, bool)>,
    total_shards: usize,
    elements: Vec<VerifyCacheElement>,
    status: OperationStatus,
}

impl FindCacheFilesOperation {
    pub fn new(system: Arc<CacheSystem>, package: impl Into<String>) -> Self {
        Self {
            system,
            package: package.into(),
            step: FindStep::None,
            shards: Vec::new(),
            total_shards: 0,
            elements: Vec::new(),
            status: OperationStatus::None,
        }
    }

    /// Entries found so far.
    pub fn elements(&self) -> &[VerifyCacheElement] {
        &self.elements
    }

    pub fn take_elements(&mut self) -> Vec<VerifyCacheElement> {
        std::mem::take(&mut self.elements)
    }

    fn list_shards(&mut self) {
        for is_raw in [false, true] {
            let root = self.system.layout().files_root(&self.package, is_raw);
            let Ok(entries) = fs::read_dir(&root) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    self.shards.push((path, is_raw));
                }
            }
        }
        self.total_shards = self.shards.len();
    }

    fn scan_shard(&mut self, shard: PathBuf, is_raw: bool) {
        let Ok(entries) = fs::read_dir(&shard) else {
            return;
        };
        for entry in entries.flatten() {
            let file_root = entry.path();
            if !file_root.is_dir() {
                continue;
            }
            let Some(guid) = file_root.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if self.system.is_cached(&self.package, guid) {
                continue;
            }
            let data = file_root.join(CACHE_DATA_FILE_NAME);
            let info = file_root.join(CACHE_INFO_FILE_NAME);
            // Only a partial download in here; leave it for break-resume
            if !data.exists() && !info.exists() {
                continue;
            }
            self.elements.push(VerifyCacheElement::new(
                self.package.clone(),
                guid,
                is_raw,
                file_root.clone(),
                data,
                info,
            ));
        }
    }
}

impl AsyncOperation for FindCacheFilesOperation {
    fn update(&mut self) {
        match self.step {
            FindStep::None => {
                self.status = OperationStatus::Processing;
                self.step = FindStep::ListShards;
            }
            FindStep::ListShards => {
                self.list_shards();
                self.step = FindStep::ScanShards;
            }
            FindStep::ScanShards => {
                for _ in 0..SHARD_DIRS_PER_STEP {
                    let Some((shard, is_raw)) = self.shards.pop() else {
                        break;
                    };
                    self.scan_shard(shard, is_raw);
                }
                if self.shards.is_empty() {
                    debug!(
                        package = %self.package,
                        found = self.elements.len(),
                        "Cache scan complete"
                    );
                    self.step = FindStep::Done;
                    self.status = OperationStatus::Succeed;
                }
            }
            FindStep::Done => {}
        }
    }

    fn status(&self) -> OperationStatus {
        self.status
    }

    fn progress(&self) -> f32 {
        match self.step {
            FindStep::None | FindStep::ListShards => 0.0,
            FindStep::Done => 1.0,
            FindStep::ScanShards if self.total_shards == 0 => 1.0,
            FindStep::ScanShards => {
                (self.total_shards - self.shards.len()) as f32 / self.total_shards as f32
            }
        }
    }

    fn error(&self) -> Option<&str> {
        None
    }
}

/// Verify discovered cache entries, recording or deleting each.
///
/// The operation always finishes `Succeed`; per-file outcomes are exposed
/// through [`VerifyCacheFilesOperation::succeed_count`] and
/// [`VerifyCacheFilesOperation::failed_count`].
#[derive(Debug)]
pub struct VerifyCacheFilesOperation {
    system: Arc<CacheSystem>,
    queue: VerifyQueue<VerifyCacheElement>,
    total: usize,
    succeed: usize,
    failed: usize,
    status: OperationStatus,
}

impl VerifyCacheFilesOperation {
    pub fn new(
        system: Arc<CacheSystem>,
        executor: VerifyExecutor,
        level: VerifyLevel,
        elements: Vec<VerifyCacheElement>,
    ) -> Self {
        let total = elements.len();
        Self {
            system,
            queue: VerifyQueue::new(executor, level, elements),
            total,
            succeed: 0,
            failed: 0,
            status: OperationStatus::None,
        }
    }

    pub fn total_count(&self) -> usize {
        self.total
    }

    pub fn succeed_count(&self) -> usize {
        self.succeed
    }

    pub fn failed_count(&self) -> usize {
        self.failed
    }

    fn finish_element(&mut self, element: VerifyCacheElement) {
        match element.result {
            Some(VerifyResult::Succeed) => {
                self.succeed += 1;
                self.system.record(
                    &element.package,
                    &element.cache_guid,
                    RecordWrapper {
                        info_file_path: element.info_file_path,
                        data_file_path: element.data_file_path,
                        data_file_crc: element.data_file_crc,
                        data_file_size: element.data_file_size,
                    },
                );
            }
            result => {
                self.failed += 1;
                warn!(
                    package = %element.package,
                    cache_guid = %element.cache_guid,
                    result = %result.map(|r| r.to_string()).unwrap_or_else(|| "not run".into()),
                    "Cache entry failed verification, deleting"
                );
                delete_file_root(&element.file_root_path);
            }
        }
    }
}

impl AsyncOperation for VerifyCacheFilesOperation {
    fn update(&mut self) {
        if self.status.is_done() {
            return;
        }
        self.status = OperationStatus::Processing;

        for element in self.queue.poll() {
            self.finish_element(element);
        }

        if self.queue.is_empty() {
            info!(
                total = self.total,
                succeed = self.succeed,
                failed = self.failed,
                "Cache verification complete"
            );
            self.status = OperationStatus::Succeed;
        }
    }

    fn status(&self) -> OperationStatus {
        self.status
    }

    fn progress(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        (self.succeed + self.failed) as f32 / self.total as f32
    }

    fn error(&self) -> Option<&str> {
        None
    }
}

/// Verify one downloaded temp file.
#[derive(Debug)]
pub struct VerifyTempFileOperation {
    queue: VerifyQueue<VerifyTempElement>,
    result: Option<VerifyResult>,
    status: OperationStatus,
    error: Option<String>,
}

impl VerifyTempFileOperation {
    pub fn new(executor: VerifyExecutor, element: VerifyTempElement) -> Self {
        Self {
            queue: VerifyQueue::new(executor, VerifyLevel::High, vec![element]),
            result: None,
            status: OperationStatus::None,
            error: None,
        }
    }

    pub fn verify_result(&self) -> Option<VerifyResult> {
        self.result
    }
}

impl AsyncOperation for VerifyTempFileOperation {
    fn update(&mut self) {
        if self.status.is_done() {
            return;
        }
        self.status = OperationStatus::Processing;

        if let Some(element) = self.queue.poll().pop() {
            let result = element.result.unwrap_or(VerifyResult::Exception);
            self.result = Some(result);
            if result.is_success() {
                self.status = OperationStatus::Succeed;
            } else {
                self.error = Some(format!(
                    "verify {} failed: {}",
                    element.temp_file_path.display(),
                    result
                ));
                self.status = OperationStatus::Failed;
            }
        }
    }

    fn status(&self) -> OperationStatus {
        self.status
    }

    fn progress(&self) -> f32 {
        if self.status.is_done() {
            1.0
        } else {
            0.0
        }
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{OutputNameStyle, PatchBundle};
    use crate::cache::layout::CacheLayout;
    use crate::checksum::{crc32, format_crc};
    use tempfile::TempDir;

    fn committed(system: &CacheSystem, name: &str, hash: &str, data: &[u8]) -> PatchBundle {
        let mut bundle = PatchBundle::new(name, hash, format_crc(crc32(data)), data.len() as u64);
        bundle.parse_bundle("pkg", OutputNameStyle::HashName);
        let temp = system.layout().bundle_temp_path(&bundle);
        fs::create_dir_all(temp.parent().unwrap()).unwrap();
        fs::write(&temp, data).unwrap();
        system.commit_temp_file(&bundle).unwrap();
        bundle
    }

    fn scan_and_verify(
        root: &std::path::Path,
        executor: VerifyExecutor,
    ) -> (Arc<CacheSystem>, VerifyCacheFilesOperation) {
        let system = Arc::new(CacheSystem::new(CacheLayout::new(root)));
        let mut find = FindCacheFilesOperation::new(system.clone(), "pkg");
        find.wait_for_async_complete();
        let mut verify = VerifyCacheFilesOperation::new(
            system.clone(),
            executor,
            VerifyLevel::High,
            find.take_elements(),
        );
        verify.wait_for_async_complete();
        (system, verify)
    }

    #[test]
    fn test_scan_finds_committed_entries() {
        let dir = TempDir::new().unwrap();
        let seed = CacheSystem::new(CacheLayout::new(dir.path()));
        let a = committed(&seed, "a.bundle", "aa0001", b"alpha");
        let b = committed(&seed, "b.bundle", "bb0002", b"beta");

        let (system, verify) = scan_and_verify(dir.path(), VerifyExecutor::synchronous());

        assert_eq!(verify.status(), OperationStatus::Succeed);
        assert_eq!(verify.succeed_count(), 2);
        assert_eq!(verify.failed_count(), 0);
        assert!(system.is_bundle_cached(&a));
        assert!(system.is_bundle_cached(&b));
        assert_eq!(verify.progress(), 1.0);
    }

    #[test]
    fn test_corrupted_entry_is_swept() {
        let dir = TempDir::new().unwrap();
        let seed = CacheSystem::new(CacheLayout::new(dir.path()));
        let good = committed(&seed, "a.bundle", "aa0001", b"alpha");
        let bad = committed(&seed, "b.bundle", "bb0002", b"beta");
        fs::write(seed.layout().bundle_data_path(&bad), b"bet4").unwrap();

        let (system, verify) = scan_and_verify(dir.path(), VerifyExecutor::threaded(2).unwrap());

        assert_eq!(verify.succeed_count(), 1);
        assert_eq!(verify.failed_count(), 1);
        assert!(system.is_bundle_cached(&good));
        assert!(!system.is_bundle_cached(&bad));
        assert!(!system.layout().bundle_file_root(&bad).exists());
    }

    #[test]
    fn test_data_without_info_is_swept() {
        let dir = TempDir::new().unwrap();
        let layout = CacheLayout::new(dir.path());
        let data = layout.data_file_path("pkg", "cc0003", true);
        fs::create_dir_all(data.parent().unwrap()).unwrap();
        fs::write(&data, b"orphan").unwrap();

        let (system, verify) = scan_and_verify(dir.path(), VerifyExecutor::synchronous());

        assert_eq!(verify.failed_count(), 1);
        assert!(!system.is_cached("pkg", "cc0003"));
        assert!(!layout.file_root("pkg", "cc0003", true).exists());
    }

    #[test]
    fn test_partial_download_is_kept() {
        let dir = TempDir::new().unwrap();
        let layout = CacheLayout::new(dir.path());
        let temp = layout.temp_file_path("pkg", "dd0004", false);
        fs::create_dir_all(temp.parent().unwrap()).unwrap();
        fs::write(&temp, b"half").unwrap();

        let (_, verify) = scan_and_verify(dir.path(), VerifyExecutor::synchronous());

        assert_eq!(verify.total_count(), 0);
        assert!(temp.exists());
    }

    #[test]
    fn test_indexed_entries_are_skipped() {
        let dir = TempDir::new().unwrap();
        let system = Arc::new(CacheSystem::new(CacheLayout::new(dir.path())));
        committed(&system, "a.bundle", "aa0001", b"alpha");

        let mut find = FindCacheFilesOperation::new(system, "pkg");
        find.wait_for_async_complete();
        assert!(find.elements().is_empty());
    }

    #[test]
    fn test_empty_cache_scan() {
        let dir = TempDir::new().unwrap();
        let (_, verify) = scan_and_verify(dir.path(), VerifyExecutor::synchronous());
        assert_eq!(verify.total_count(), 0);
        assert_eq!(verify.status(), OperationStatus::Succeed);
    }

    #[test]
    fn test_verify_temp_file_operation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("__data.temp");
        fs::write(&path, b"temp payload").unwrap();

        let mut ok = VerifyTempFileOperation::new(
            VerifyExecutor::threaded(1).unwrap(),
            VerifyTempElement::new(path.clone(), format_crc(crc32(b"temp payload")), 12),
        );
        ok.wait_for_async_complete();
        assert_eq!(ok.status(), OperationStatus::Succeed);
        assert_eq!(ok.verify_result(), Some(VerifyResult::Succeed));

        let mut short = VerifyTempFileOperation::new(
            VerifyExecutor::synchronous(),
            VerifyTempElement::new(path, "00000000", 20),
        );
        short.wait_for_async_complete();
        assert_eq!(short.status(), OperationStatus::Failed);
        assert_eq!(short.verify_result(), Some(VerifyResult::FileNotComplete));
        assert!(short.error().unwrap().contains("file not complete"));
    }
}
