//! Batch download of a bundle list.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use super::error::USER_ABORT;
use super::system::{DownloadSystem, DownloaderHandle};
use super::DownloadRequest;
use crate::operation::{AsyncOperation, OperationStatus};

/// Default number of bundles downloaded at once.
pub const DEFAULT_DOWNLOADING_MAX_NUMBER: usize = 10;

/// Aggregate progress of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadProgress {
    pub total_count: usize,
    pub current_count: usize,
    pub total_bytes: u64,
    pub current_bytes: u64,
}

/// A bundle that could not be downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDownload {
    pub bundle_name: String,
    pub error: String,
    pub http_code: Option<u16>,
}

type ProgressCallback = Box<dyn FnMut(DownloadProgress) + Send>;
type ErrorCallback = Box<dyn FnMut(&FailedDownload) + Send>;
type StartCallback = Box<dyn FnMut(&str, u64) + Send>;
type FinishCallback = Box<dyn FnMut(bool) + Send>;

#[derive(Default)]
struct Callbacks {
    on_progress: Option<ProgressCallback>,
    on_error: Option<ErrorCallback>,
    on_start: Option<StartCallback>,
    on_finish: Option<FinishCallback>,
}

/// Downloads a list of bundles with bounded concurrency.
///
/// Also used to unpack built-in content: the request URLs then point at the
/// built-in files. Once any bundle fails no new downloads are started; the
/// operation fails after the ones in flight settle.
pub struct PatchDownloaderOperation {
    system: Arc<DownloadSystem>,
    max_concurrency: usize,
    waiting: VecDeque<DownloadRequest>,
    downloading: Vec<(DownloaderHandle, u64)>,
    failed: Vec<FailedDownload>,
    progress: DownloadProgress,
    finished_bytes: u64,
    started: bool,
    paused: bool,
    status: OperationStatus,
    error: Option<String>,
    callbacks: Callbacks,
}

impl fmt::Debug for PatchDownloaderOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchDownloaderOperation")
            .field("max_concurrency", &self.max_concurrency)
            .field("waiting", &self.waiting.len())
            .field("downloading", &self.downloading.len())
            .field("progress", &self.progress)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl PatchDownloaderOperation {
    pub fn new(
        system: Arc<DownloadSystem>,
        requests: Vec<DownloadRequest>,
        max_concurrency: usize,
    ) -> Self {
        let progress = DownloadProgress {
            total_count: requests.len(),
            current_count: 0,
            total_bytes: requests.iter().map(|r| r.bundle.file_size).sum(),
            current_bytes: 0,
        };
        Self {
            system,
            max_concurrency: max_concurrency.max(1),
            waiting: requests.into(),
            downloading: Vec::new(),
            failed: Vec::new(),
            progress,
            finished_bytes: 0,
            started: false,
            paused: false,
            status: OperationStatus::None,
            error: None,
            callbacks: Callbacks::default(),
        }
    }

    pub fn on_progress(mut self, f: impl FnMut(DownloadProgress) + Send + 'static) -> Self {
        self.callbacks.on_progress = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&FailedDownload) + Send + 'static) -> Self {
        self.callbacks.on_error = Some(Box::new(f));
        self
    }

    pub fn on_start(mut self, f: impl FnMut(&str, u64) + Send + 'static) -> Self {
        self.callbacks.on_start = Some(Box::new(f));
        self
    }

    pub fn on_finish(mut self, f: impl FnMut(bool) + Send + 'static) -> Self {
        self.callbacks.on_finish = Some(Box::new(f));
        self
    }

    pub fn total_download_count(&self) -> usize {
        self.progress.total_count
    }

    pub fn total_download_bytes(&self) -> u64 {
        self.progress.total_bytes
    }

    pub fn current_download_count(&self) -> usize {
        self.progress.current_count
    }

    pub fn current_download_bytes(&self) -> u64 {
        self.progress.current_bytes
    }

    pub fn failed(&self) -> &[FailedDownload] {
        &self.failed
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Start downloading; before this `update()` does nothing.
    pub fn begin_download(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.status = OperationStatus::Processing;
        info!(
            count = self.progress.total_count,
            bytes = self.progress.total_bytes,
            "Download batch started"
        );
    }

    /// Stop starting new downloads; running ones continue.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Abort in-flight downloads and fail the operation.
    pub fn cancel(&mut self) {
        if self.status.is_done() {
            return;
        }
        for (handle, _) in self.downloading.drain(..) {
            let mut downloader = handle.lock();
            downloader.release();
            if downloader.ref_count() == 0 {
                downloader.abort();
            }
        }
        self.waiting.clear();
        self.fail(USER_ABORT.to_string());
    }

    fn fail(&mut self, error: String) {
        self.error = Some(error);
        self.status = OperationStatus::Failed;
        if let Some(cb) = self.callbacks.on_finish.as_mut() {
            cb(false);
        }
    }

    fn collect_finished(&mut self) {
        let mut still_running = Vec::with_capacity(self.downloading.len());
        let mut in_flight_bytes = 0;

        for (handle, size) in self.downloading.drain(..) {
            let mut downloader = handle.lock();
            if !downloader.is_done() {
                in_flight_bytes += downloader.downloaded_bytes();
                drop(downloader);
                still_running.push((handle, size));
                continue;
            }

            if downloader.status() == OperationStatus::Succeed {
                self.progress.current_count += 1;
                self.finished_bytes += size;
            } else {
                let failure = FailedDownload {
                    bundle_name: downloader.bundle_name().to_string(),
                    error: downloader.error().unwrap_or("unknown error").to_string(),
                    http_code: downloader.last_code(),
                };
                warn!(
                    bundle = %failure.bundle_name,
                    error = %failure.error,
                    "Bundle download failed"
                );
                if let Some(cb) = self.callbacks.on_error.as_mut() {
                    cb(&failure);
                }
                self.failed.push(failure);
            }
            downloader.release();
        }

        self.downloading = still_running;
        self.progress.current_bytes = self.finished_bytes + in_flight_bytes;
    }

    fn start_more(&mut self) {
        if self.paused || !self.failed.is_empty() {
            return;
        }
        while self.downloading.len() < self.max_concurrency {
            let Some(request) = self.waiting.pop_front() else {
                break;
            };
            let size = request.bundle.file_size;
            if let Some(cb) = self.callbacks.on_start.as_mut() {
                cb(&request.bundle.bundle_name, size);
            }
            let handle = self.system.begin_download(request);
            self.downloading.push((handle, size));
        }
    }
}

impl AsyncOperation for PatchDownloaderOperation {
    fn update(&mut self) {
        if !self.started || self.status.is_done() {
            return;
        }

        self.system.update();

        let before = self.progress;
        self.collect_finished();
        self.start_more();
        if self.progress != before {
            if let Some(cb) = self.callbacks.on_progress.as_mut() {
                cb(self.progress);
            }
        }

        if !self.downloading.is_empty() {
            return;
        }

        if let Some(first) = self.failed.first() {
            let error = format!("failed to download {}: {}", first.bundle_name, first.error);
            self.fail(error);
        } else if self.waiting.is_empty() {
            info!(
                count = self.progress.current_count,
                bytes = self.progress.current_bytes,
                "Download batch complete"
            );
            self.status = OperationStatus::Succeed;
            if let Some(cb) = self.callbacks.on_finish.as_mut() {
                cb(true);
            }
        }
    }

    fn status(&self) -> OperationStatus {
        self.status
    }

    fn progress(&self) -> f32 {
        if self.progress.total_count == 0 {
            return 1.0;
        }
        if self.progress.total_bytes == 0 {
            return self.progress.current_count as f32 / self.progress.total_count as f32;
        }
        (self.progress.current_bytes as f64 / self.progress.total_bytes as f64).min(1.0) as f32
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheLayout, CacheSystem, VerifyExecutor};
    use crate::download::test_support::{bundle_for, MemoryTransport};
    use crate::download::DownloaderOptions;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(dir: &TempDir, transport: Arc<MemoryTransport>) -> Arc<DownloadSystem> {
        Arc::new(DownloadSystem::new(
            Arc::new(CacheSystem::new(CacheLayout::new(dir.path()))),
            transport,
            VerifyExecutor::synchronous(),
            DownloaderOptions::default()
                .with_failed_try_again(1)
                .with_try_again_delay(Duration::from_millis(1)),
        ))
    }

    fn request(
        transport: &MemoryTransport,
        name: &str,
        hash: &str,
        data: &[u8],
    ) -> DownloadRequest {
        let url = format!("mem://{}", name);
        transport.serve(&url, data.to_vec());
        DownloadRequest::new(bundle_for(name, hash, data), url.clone(), url)
    }

    #[test]
    fn test_batch_downloads_everything() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MemoryTransport::new());
        let system = setup(&dir, transport.clone());
        let requests = vec![
            request(&transport, "a", "aa01", b"aaaa"),
            request(&transport, "b", "bb02", b"bbbbbb"),
            request(&transport, "c", "cc03", b"cc"),
        ];

        let events = Arc::new(Mutex::new(Vec::new()));
        let finished = Arc::new(Mutex::new(None));
        let events_cb = events.clone();
        let finished_cb = finished.clone();
        let mut op = PatchDownloaderOperation::new(system.clone(), requests, 2)
            .on_progress(move |p| events_cb.lock().push(p))
            .on_finish(move |ok| *finished_cb.lock() = Some(ok));

        // Nothing happens before begin_download
        op.update();
        assert_eq!(op.status(), OperationStatus::None);

        op.begin_download();
        op.wait_for_async_complete();

        assert_eq!(op.status(), OperationStatus::Succeed);
        assert_eq!(op.current_download_count(), 3);
        assert_eq!(op.current_download_bytes(), 12);
        assert_eq!(op.total_download_bytes(), 12);
        assert_eq!(*finished.lock(), Some(true));
        let last = *events.lock().last().unwrap();
        assert_eq!(last.current_count, 3);
        assert_eq!(transport.request_count(), 3);
    }

    #[test]
    fn test_failure_stops_new_downloads() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MemoryTransport::new());
        let system = setup(&dir, transport.clone());
        let mut requests = vec![DownloadRequest::new(
            bundle_for("broken", "dd04", b"x"),
            "mem://missing",
            "mem://missing",
        )];
        requests.push(request(&transport, "a", "aa01", b"aaaa"));
        requests.push(request(&transport, "b", "bb02", b"bbbb"));

        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_cb = errors.clone();
        let mut op = PatchDownloaderOperation::new(system, requests, 1)
            .on_error(move |f| errors_cb.lock().push(f.bundle_name.clone()));
        op.begin_download();
        op.wait_for_async_complete();

        assert_eq!(op.status(), OperationStatus::Failed);
        assert_eq!(*errors.lock(), vec!["broken".to_string()]);
        assert_eq!(op.failed()[0].http_code, Some(404));
        assert!(op.error().unwrap().contains("broken"));
        // Only the broken bundle was ever requested
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn test_empty_batch_succeeds() {
        let dir = TempDir::new().unwrap();
        let system = setup(&dir, Arc::new(MemoryTransport::new()));
        let mut op = PatchDownloaderOperation::new(system, Vec::new(), 4);
        op.begin_download();
        op.wait_for_async_complete();
        assert_eq!(op.status(), OperationStatus::Succeed);
        assert_eq!(op.progress(), 1.0);
    }

    #[test]
    fn test_pause_and_resume() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MemoryTransport::new());
        let system = setup(&dir, transport.clone());
        let requests = vec![request(&transport, "a", "aa01", b"aaaa")];

        let mut op = PatchDownloaderOperation::new(system, requests, 1);
        op.begin_download();
        op.pause();
        for _ in 0..10 {
            op.update();
        }
        assert_eq!(op.status(), OperationStatus::Processing);
        assert_eq!(transport.request_count(), 0);

        op.resume();
        op.wait_for_async_complete();
        assert_eq!(op.status(), OperationStatus::Succeed);
    }

    #[test]
    fn test_cancel() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MemoryTransport::new());
        let system = setup(&dir, transport.clone());
        let requests = vec![request(&transport, "a", "aa01", b"aaaa")];

        let mut op = PatchDownloaderOperation::new(system.clone(), requests, 1);
        op.begin_download();
        op.update();
        op.cancel();

        assert_eq!(op.status(), OperationStatus::Failed);
        assert_eq!(op.error(), Some("user abort"));
        system.update();
        assert_eq!(system.downloader_count(), 0);
    }
}
