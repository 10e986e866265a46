//! Shared registry of live downloaders.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::downloader::{DownloaderOptions, FileDownloader};
use super::transport::Transport;
use super::DownloadRequest;
use crate::cache::{CacheSystem, VerifyExecutor};
use crate::operation::{AsyncOperation, OperationStatus};

/// Shared handle to a downloader.
pub type DownloaderHandle = Arc<Mutex<FileDownloader>>;

/// Deduplicates downloads by cache GUID and ticks them.
///
/// Two requests for bundles with the same content get the same downloader,
/// so a file is never fetched twice at the same time. A finished downloader
/// stays registered until every holder has released it.
#[derive(Debug)]
pub struct DownloadSystem {
    cache: Arc<CacheSystem>,
    transport: Arc<dyn Transport>,
    executor: VerifyExecutor,
    options: DownloaderOptions,
    downloaders: Mutex<HashMap<String, DownloaderHandle>>,
}

impl DownloadSystem {
    pub fn new(
        cache: Arc<CacheSystem>,
        transport: Arc<dyn Transport>,
        executor: VerifyExecutor,
        options: DownloaderOptions,
    ) -> Self {
        Self {
            cache,
            transport,
            executor,
            options,
            downloaders: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<CacheSystem> {
        &self.cache
    }

    pub fn options(&self) -> &DownloaderOptions {
        &self.options
    }

    /// Get a referenced downloader for `request`.
    ///
    /// Cached bundles get a downloader that has already succeeded. A live
    /// downloader for the same cache GUID is shared; a failed one is replaced.
    /// The caller must [`FileDownloader::release`] the handle when done.
    pub fn begin_download(&self, request: DownloadRequest) -> DownloaderHandle {
        if self.cache.is_bundle_cached(&request.bundle) {
            let mut downloader = FileDownloader::completed(
                request,
                Arc::clone(&self.cache),
                Arc::clone(&self.transport),
                self.executor.clone(),
                self.options.clone(),
            );
            downloader.reference();
            return Arc::new(Mutex::new(downloader));
        }

        let guid = request.bundle.cache_guid().to_string();
        let mut downloaders = self.downloaders.lock();

        if let Some(existing) = downloaders.get(&guid) {
            let mut downloader = existing.lock();
            if downloader.status() != OperationStatus::Failed {
                downloader.reference();
                trace!(cache_guid = %guid, refs = downloader.ref_count(), "Sharing downloader");
                return Arc::clone(existing);
            }
        }

        let mut downloader = FileDownloader::new(
            request,
            Arc::clone(&self.cache),
            Arc::clone(&self.transport),
            self.executor.clone(),
            self.options.clone(),
        );
        downloader.reference();
        debug!(cache_guid = %guid, bundle = %downloader.bundle_name(), "Downloader created");

        let handle = Arc::new(Mutex::new(downloader));
        downloaders.insert(guid, Arc::clone(&handle));
        handle
    }

    /// Tick every live downloader and drop finished, unreferenced ones.
    pub fn update(&self) {
        let handles: Vec<(String, DownloaderHandle)> = self
            .downloaders
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        let mut finished = Vec::new();
        for (guid, handle) in handles {
            let mut downloader = handle.lock();
            downloader.update();
            if downloader.is_done() && downloader.ref_count() == 0 {
                finished.push((guid, handle.clone()));
            }
        }

        if !finished.is_empty() {
            let mut downloaders = self.downloaders.lock();
            for (guid, handle) in finished {
                // Only drop the entry if it was not replaced meanwhile
                if downloaders
                    .get(&guid)
                    .map(|current| Arc::ptr_eq(current, &handle))
                    .unwrap_or(false)
                {
                    downloaders.remove(&guid);
                }
            }
        }
    }

    /// Number of registered downloaders.
    pub fn downloader_count(&self) -> usize {
        self.downloaders.lock().len()
    }

    /// Abort every downloader.
    pub fn abort_all(&self) {
        let downloaders = self.downloaders.lock();
        for handle in downloaders.values() {
            handle.lock().abort();
        }
    }
}
