//! Per-bundle download state machine.
//!
//! A [`FileDownloader`] takes one bundle from "not cached" to "committed in
//! the cache". It reuses a valid temp file left by an earlier run, resumes a
//! partial one when break-resume applies, retries with a fixed backoff, and
//! only hands the file to [`CacheSystem::commit_temp_file`] after a full
//! size and CRC check.
//!
//! ```text
//! CheckTempFile -> WaitingCheckTempFile -> PrepareDownload -> CreateDownloader
//!   -> CheckDownload -> VerifyTempFile -> WaitingVerifyTempFile -> CachingFile
//!   -> Succeed
//! (any failure) -> TryAgain -> PrepareDownload ... -> Failed
//! ```

use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::error::{DownloadError, USER_ABORT};
use super::request::{RequestTarget, WebRequest};
use super::transport::{Transport, TransportRequest};
use super::DownloadRequest;
use crate::cache::{
    CacheSystem, VerifyExecutor, VerifyResult, VerifyTempElement, VerifyTempFileOperation,
};
use crate::operation::{AsyncOperation, OperationStatus};

/// Default stall timeout.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of attempts before a download fails.
pub const DEFAULT_FAILED_TRY_AGAIN: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_TRY_AGAIN_DELAY: Duration = Duration::from_secs(1);

/// Default minimum size for break-resume (0 disables it).
pub const DEFAULT_BREAKPOINT_RESUME_FILE_SIZE: u64 = 0;

/// Status codes that invalidate a partial file by default.
pub const DEFAULT_CLEAR_FILE_RESPONSE_CODES: [u16; 2] = [404, 416];

/// Tuning shared by every downloader of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloaderOptions {
    /// Abort an attempt when no byte arrives for this long.
    pub timeout: Duration,
    /// Attempt budget; each failure spends one.
    pub failed_try_again: u32,
    pub try_again_delay: Duration,
    /// Bundles at least this large resume partial files; 0 disables.
    pub breakpoint_resume_file_size: u64,
    /// Responses that discard a partial file in resume mode.
    pub clear_file_response_codes: Vec<u16>,
}

impl Default for DownloaderOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            failed_try_again: DEFAULT_FAILED_TRY_AGAIN,
            try_again_delay: DEFAULT_TRY_AGAIN_DELAY,
            breakpoint_resume_file_size: DEFAULT_BREAKPOINT_RESUME_FILE_SIZE,
            clear_file_response_codes: DEFAULT_CLEAR_FILE_RESPONSE_CODES.to_vec(),
        }
    }
}

impl DownloaderOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_failed_try_again(mut self, attempts: u32) -> Self {
        self.failed_try_again = attempts;
        self
    }

    pub fn with_try_again_delay(mut self, delay: Duration) -> Self {
        self.try_again_delay = delay;
        self
    }

    pub fn with_breakpoint_resume_file_size(mut self, size: u64) -> Self {
        self.breakpoint_resume_file_size = size;
        self
    }

    pub fn with_clear_file_response_codes(mut self, codes: Vec<u16>) -> Self {
        self.clear_file_response_codes = codes;
        self
    }

    /// Whether a bundle of `file_size` bytes uses break-resume.
    pub fn use_resume(&self, file_size: u64) -> bool {
        self.breakpoint_resume_file_size > 0 && file_size >= self.breakpoint_resume_file_size
    }
}

/// Steps of the downloader state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloaderStep {
    None,
    CheckTempFile,
    WaitingCheckTempFile,
    PrepareDownload,
    CreateDownloader,
    CheckDownload,
    VerifyTempFile,
    WaitingVerifyTempFile,
    CachingFile,
    TryAgain,
    Succeed,
    Failed,
}

impl fmt::Display for DownloaderStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Downloads one bundle into the cache.
#[derive(Debug)]
pub struct FileDownloader {
    request: DownloadRequest,
    cache: Arc<CacheSystem>,
    transport: Arc<dyn Transport>,
    executor: VerifyExecutor,
    options: DownloaderOptions,
    resume: bool,
    temp_path: PathBuf,

    step: DownloaderStep,
    status: OperationStatus,
    web_request: Option<WebRequest>,
    verify_op: Option<VerifyTempFileOperation>,
    request_count: u32,
    attempts_left: u32,
    try_again_at: Option<Instant>,

    resumed_bytes: u64,
    downloaded_bytes: u64,
    last_progress_bytes: u64,
    last_progress_at: Instant,

    last_error: Option<String>,
    last_code: Option<u16>,
    ref_count: usize,
}

impl FileDownloader {
    pub fn new(
        request: DownloadRequest,
        cache: Arc<CacheSystem>,
        transport: Arc<dyn Transport>,
        executor: VerifyExecutor,
        options: DownloaderOptions,
    ) -> Self {
        let resume = options.use_resume(request.bundle.file_size);
        let temp_path = cache.layout().bundle_temp_path(&request.bundle);
        let attempts_left = options.failed_try_again.max(1);
        Self {
            request,
            cache,
            transport,
            executor,
            options,
            resume,
            temp_path,
            step: DownloaderStep::None,
            status: OperationStatus::None,
            web_request: None,
            verify_op: None,
            request_count: 0,
            attempts_left,
            try_again_at: None,
            resumed_bytes: 0,
            downloaded_bytes: 0,
            last_progress_bytes: 0,
            last_progress_at: Instant::now(),
            last_error: None,
            last_code: None,
            ref_count: 0,
        }
    }

    /// A downloader for a bundle that is already cached.
    pub fn completed(
        request: DownloadRequest,
        cache: Arc<CacheSystem>,
        transport: Arc<dyn Transport>,
        executor: VerifyExecutor,
        options: DownloaderOptions,
    ) -> Self {
        let mut downloader = Self::new(request, cache, transport, executor, options);
        downloader.downloaded_bytes = downloader.request.bundle.file_size;
        downloader.step = DownloaderStep::Succeed;
        downloader.status = OperationStatus::Succeed;
        downloader
    }

    pub fn request(&self) -> &DownloadRequest {
        &self.request
    }

    pub fn bundle_name(&self) -> &str {
        &self.request.bundle.bundle_name
    }

    pub fn cache_guid(&self) -> &str {
        self.request.bundle.cache_guid()
    }

    pub fn step(&self) -> DownloaderStep {
        self.step
    }

    pub fn is_resume(&self) -> bool {
        self.resume
    }

    /// Bytes of the bundle present on disk, including resumed ones.
    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes
    }

    /// Last HTTP status code observed.
    pub fn last_code(&self) -> Option<u16> {
        self.last_code
    }

    /// Number of transport requests issued so far.
    pub fn request_count(&self) -> u32 {
        self.request_count
    }

    pub fn reference(&mut self) {
        self.ref_count += 1;
    }

    pub fn release(&mut self) {
        self.ref_count = self.ref_count.saturating_sub(1);
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    /// Abort the download; the downloader fails with `"user abort"`.
    pub fn abort(&mut self) {
        if self.status.is_done() {
            return;
        }
        if let Some(mut request) = self.web_request.take() {
            request.abort();
        }
        self.verify_op = None;
        if !self.resume {
            remove_file_quietly(&self.temp_path);
        }
        self.last_error = Some(USER_ABORT.to_string());
        self.step = DownloaderStep::Failed;
        self.status = OperationStatus::Failed;
        info!(bundle = %self.bundle_name(), "Download aborted");
    }

    /// Alternate between the main and fallback URL per request.
    fn next_url(&mut self) -> String {
        self.request_count += 1;
        if self.request_count % 2 == 0 {
            self.request.fallback_url.clone()
        } else {
            self.request.main_url.clone()
        }
    }

    fn start_verify(&mut self) {
        let bundle = &self.request.bundle;
        self.verify_op = Some(VerifyTempFileOperation::new(
            self.executor.clone(),
            VerifyTempElement::new(
                self.temp_path.clone(),
                bundle.file_crc.clone(),
                bundle.file_size,
            ),
        ));
    }

    /// Drive the verify operation; returns its result once finished.
    fn poll_verify(&mut self) -> Option<VerifyResult> {
        let op = self.verify_op.as_mut()?;
        op.update();
        if !op.is_done() {
            return None;
        }
        let result = op.verify_result().unwrap_or(VerifyResult::Exception);
        self.verify_op = None;
        Some(result)
    }

    fn fail_attempt(&mut self, error: DownloadError) {
        if let Some(code) = error.http_code() {
            self.last_code = Some(code);
        }
        let message = error.to_string();
        self.last_error = Some(message.clone());
        self.web_request = None;
        self.verify_op = None;
        self.attempts_left = self.attempts_left.saturating_sub(1);

        if self.attempts_left > 0 {
            warn!(
                bundle = %self.bundle_name(),
                error = %message,
                attempts_left = self.attempts_left,
                "Download attempt failed, trying again"
            );
            self.try_again_at = Some(Instant::now() + self.options.try_again_delay);
            self.step = DownloaderStep::TryAgain;
        } else {
            error!(
                bundle = %self.bundle_name(),
                error = %message,
                code = ?self.last_code,
                "Download failed"
            );
            self.step = DownloaderStep::Failed;
            self.status = OperationStatus::Failed;
        }
    }

    fn step_check_download(&mut self) {
        let Some(request) = self.web_request.as_mut() else {
            self.step = DownloaderStep::PrepareDownload;
            return;
        };

        let received = request.received_bytes();
        self.downloaded_bytes = self.resumed_bytes + received;
        if received != self.last_progress_bytes {
            self.last_progress_bytes = received;
            self.last_progress_at = Instant::now();
        }

        if !request.is_done() {
            if self.last_progress_at.elapsed() >= self.options.timeout {
                let url = request.url().to_string();
                request.abort();
                self.fail_attempt(DownloadError::Timeout {
                    url,
                    timeout_secs: self.options.timeout.as_secs(),
                });
            }
            return;
        }

        let Some(outcome) = request.take_outcome() else {
            return;
        };
        self.web_request = None;
        if let Some(code) = outcome.http_code {
            self.last_code = Some(code);
        }

        match outcome.result {
            Ok(_) => self.step = DownloaderStep::VerifyTempFile,
            Err(e) => {
                if self.resume {
                    if let Some(code) = outcome.http_code {
                        if self.options.clear_file_response_codes.contains(&code) {
                            debug!(bundle = %self.bundle_name(), code, "Discarding partial file");
                            remove_file_quietly(&self.temp_path);
                        }
                    }
                } else {
                    remove_file_quietly(&self.temp_path);
                }
                self.fail_attempt(e);
            }
        }
    }
}

impl AsyncOperation for FileDownloader {
    fn update(&mut self) {
        match self.step {
            DownloaderStep::None => {
                self.status = OperationStatus::Processing;
                self.step = DownloaderStep::CheckTempFile;
            }

            DownloaderStep::CheckTempFile => {
                if self.temp_path.exists() {
                    self.start_verify();
                    self.step = DownloaderStep::WaitingCheckTempFile;
                } else {
                    self.step = DownloaderStep::PrepareDownload;
                }
            }

            DownloaderStep::WaitingCheckTempFile => {
                if let Some(result) = self.poll_verify() {
                    match result {
                        VerifyResult::Succeed => {
                            debug!(bundle = %self.bundle_name(), "Reusing verified temp file");
                            self.downloaded_bytes = self.request.bundle.file_size;
                            self.step = DownloaderStep::CachingFile;
                        }
                        VerifyResult::FileNotComplete if self.resume => {
                            self.step = DownloaderStep::PrepareDownload;
                        }
                        _ => {
                            remove_file_quietly(&self.temp_path);
                            self.step = DownloaderStep::PrepareDownload;
                        }
                    }
                }
            }

            DownloaderStep::PrepareDownload => {
                self.downloaded_bytes = 0;
                self.last_progress_bytes = 0;
                self.last_progress_at = Instant::now();
                if !self.resume {
                    remove_file_quietly(&self.temp_path);
                }
                self.step = DownloaderStep::CreateDownloader;
            }

            DownloaderStep::CreateDownloader => {
                let url = self.next_url();
                let mut transport_request =
                    TransportRequest::new(url).with_timeout(self.options.timeout);

                self.resumed_bytes = 0;
                if self.resume {
                    let existing = fs::metadata(&self.temp_path).map(|m| m.len()).unwrap_or(0);
                    if existing > 0 {
                        self.resumed_bytes = existing;
                        transport_request = transport_request.with_range_start(existing);
                    }
                }
                self.downloaded_bytes = self.resumed_bytes;

                let target = RequestTarget::File {
                    path: self.temp_path.clone(),
                    append: self.resumed_bytes > 0,
                };
                debug!(
                    bundle = %self.bundle_name(),
                    url = %transport_request.url,
                    range_start = ?transport_request.range_start,
                    "Starting download"
                );
                match WebRequest::start(Arc::clone(&self.transport), transport_request, target) {
                    Ok(request) => {
                        self.web_request = Some(request);
                        self.last_progress_at = Instant::now();
                        self.step = DownloaderStep::CheckDownload;
                    }
                    Err(e) => self.fail_attempt(e),
                }
            }

            DownloaderStep::CheckDownload => self.step_check_download(),

            DownloaderStep::VerifyTempFile => {
                self.start_verify();
                self.step = DownloaderStep::WaitingVerifyTempFile;
            }

            DownloaderStep::WaitingVerifyTempFile => {
                if let Some(result) = self.poll_verify() {
                    if result.is_success() {
                        self.step = DownloaderStep::CachingFile;
                    } else {
                        remove_file_quietly(&self.temp_path);
                        self.fail_attempt(DownloadError::VerifyFailed {
                            path: self.temp_path.clone(),
                            result,
                        });
                    }
                }
            }

            DownloaderStep::CachingFile => match self.cache.commit_temp_file(&self.request.bundle) {
                Ok(()) => {
                    self.downloaded_bytes = self.request.bundle.file_size;
                    self.step = DownloaderStep::Succeed;
                    self.status = OperationStatus::Succeed;
                    info!(
                        bundle = %self.bundle_name(),
                        size = self.request.bundle.file_size,
                        "Bundle cached"
                    );
                }
                Err(e) => {
                    remove_file_quietly(&self.temp_path);
                    self.fail_attempt(DownloadError::Cache(e));
                }
            },

            DownloaderStep::TryAgain => {
                let ready = self
                    .try_again_at
                    .map(|at| Instant::now() >= at)
                    .unwrap_or(true);
                if ready {
                    self.try_again_at = None;
                    self.step = DownloaderStep::PrepareDownload;
                }
            }

            DownloaderStep::Succeed | DownloaderStep::Failed => {}
        }
    }

    fn status(&self) -> OperationStatus {
        self.status
    }

    fn progress(&self) -> f32 {
        let size = self.request.bundle.file_size;
        if size == 0 {
            return if self.status == OperationStatus::Succeed { 1.0 } else { 0.0 };
        }
        (self.downloaded_bytes as f64 / size as f64).min(1.0) as f32
    }

    fn error(&self) -> Option<&str> {
        if self.status == OperationStatus::Failed {
            self.last_error.as_deref()
        } else {
            None
        }
    }
}

fn remove_file_quietly(path: &std::path::Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLayout;
    use crate::download::test_support::{bundle_for, MemoryTransport};
    use crate::download::{DownloadResult, TransportResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Counts calls and refuses every one of them.
    #[derive(Debug, Default)]
    struct RefusingTransport {
        calls: AtomicUsize,
    }

    impl Transport for RefusingTransport {
        fn open(&self, request: &TransportRequest) -> DownloadResult<TransportResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DownloadError::RequestFailed {
                url: request.url.clone(),
                reason: "no request expected".to_string(),
            })
        }
    }

    fn downloader(
        dir: &TempDir,
        transport: Arc<MemoryTransport>,
        data: &[u8],
        options: DownloaderOptions,
    ) -> (FileDownloader, Arc<CacheSystem>) {
        let cache = Arc::new(CacheSystem::new(CacheLayout::new(dir.path())));
        let bundle = bundle_for("hero.bundle", "cc33dd", data);
        let request = DownloadRequest::new(bundle, "mem://main/hero", "mem://fallback/hero");
        (
            FileDownloader::new(
                request,
                cache.clone(),
                transport,
                VerifyExecutor::synchronous(),
                options,
            ),
            cache,
        )
    }

    fn fast_options() -> DownloaderOptions {
        DownloaderOptions::default().with_try_again_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_fresh_download_commits() {
        let dir = TempDir::new().unwrap();
        let data = b"hero bundle bytes".to_vec();
        let transport = Arc::new(MemoryTransport::new());
        transport.serve("mem://main/hero", data.clone());

        let (mut dl, cache) = downloader(&dir, transport.clone(), &data, fast_options());
        dl.wait_for_async_complete();

        assert_eq!(dl.status(), OperationStatus::Succeed);
        assert!(cache.is_bundle_cached(&dl.request().bundle));
        assert_eq!(dl.progress(), 1.0);
        assert_eq!(transport.request_count(), 1);
        assert!(!cache.layout().bundle_temp_path(&dl.request().bundle).exists());
    }

    #[test]
    fn test_valid_temp_file_skips_download() {
        let dir = TempDir::new().unwrap();
        let data = b"already here".to_vec();
        let transport = Arc::new(MemoryTransport::new());

        let (mut dl, cache) = downloader(&dir, transport.clone(), &data, fast_options());
        let temp = cache.layout().bundle_temp_path(&dl.request().bundle);
        fs::create_dir_all(temp.parent().unwrap()).unwrap();
        fs::write(&temp, &data).unwrap();

        dl.wait_for_async_complete();

        assert_eq!(dl.status(), OperationStatus::Succeed);
        assert_eq!(transport.request_count(), 0);
        assert!(cache.is_bundle_cached(&dl.request().bundle));
    }

    #[test]
    fn test_complete_temp_file_skips_resume_download() {
        let dir = TempDir::new().unwrap();
        let data = b"0123456789abcdef".to_vec();
        let transport = Arc::new(RefusingTransport::default());
        let cache = Arc::new(CacheSystem::new(CacheLayout::new(dir.path())));
        let bundle = bundle_for("hero.bundle", "cc33dd", &data);
        let temp = cache.layout().bundle_temp_path(&bundle);
        fs::create_dir_all(temp.parent().unwrap()).unwrap();
        fs::write(&temp, &data).unwrap();

        let options = fast_options().with_breakpoint_resume_file_size(8);
        let mut dl = FileDownloader::new(
            DownloadRequest::new(bundle, "mem://main/hero", "mem://fallback/hero"),
            cache.clone(),
            transport.clone(),
            VerifyExecutor::synchronous(),
            options,
        );
        assert!(dl.is_resume());
        dl.wait_for_async_complete();

        assert_eq!(dl.status(), OperationStatus::Succeed, "{:?}", dl.error());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(dl.request_count(), 0);
        assert_eq!(dl.downloaded_bytes(), data.len() as u64);
        assert!(cache.is_bundle_cached(&dl.request().bundle));
        assert_eq!(
            fs::read(cache.layout().bundle_data_path(&dl.request().bundle)).unwrap(),
            data
        );
        assert!(!temp.exists());
    }

    #[test]
    fn test_retry_budget_exhausted() {
        let dir = TempDir::new().unwrap();
        let data = b"never served".to_vec();
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_with("mem://main/hero", 503);
        transport.fail_with("mem://fallback/hero", 503);

        let (mut dl, cache) = downloader(
            &dir,
            transport.clone(),
            &data,
            fast_options().with_failed_try_again(3),
        );
        dl.wait_for_async_complete();

        assert_eq!(dl.status(), OperationStatus::Failed);
        assert_eq!(transport.request_count(), 3);
        assert_eq!(dl.last_code(), Some(503));
        assert!(dl.error().unwrap().contains("503"));
        assert!(!cache.is_bundle_cached(&dl.request().bundle));
    }

    #[test]
    fn test_fallback_url_used_on_retry() {
        let dir = TempDir::new().unwrap();
        let data = b"from fallback".to_vec();
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_with("mem://main/hero", 500);
        transport.serve("mem://fallback/hero", data.clone());

        let (mut dl, _) = downloader(&dir, transport.clone(), &data, fast_options());
        dl.wait_for_async_complete();

        assert_eq!(dl.status(), OperationStatus::Succeed);
        assert_eq!(
            transport.requested_urls(),
            vec!["mem://main/hero".to_string(), "mem://fallback/hero".to_string()]
        );
    }

    #[test]
    fn test_corrupted_download_is_not_committed() {
        let dir = TempDir::new().unwrap();
        let data = b"expected payload".to_vec();
        let transport = Arc::new(MemoryTransport::new());
        transport.serve("mem://main/hero", b"tampered payload".to_vec());
        transport.serve("mem://fallback/hero", b"tampered payload".to_vec());

        let (mut dl, cache) = downloader(
            &dir,
            transport,
            &data,
            fast_options().with_failed_try_again(2),
        );
        dl.wait_for_async_complete();

        assert_eq!(dl.status(), OperationStatus::Failed);
        assert!(dl.error().unwrap().contains("crc"));
        assert!(!cache.is_bundle_cached(&dl.request().bundle));
        assert!(!cache.layout().bundle_data_path(&dl.request().bundle).exists());
        assert!(!cache.layout().bundle_temp_path(&dl.request().bundle).exists());
    }

    #[test]
    fn test_resume_appends_partial_file() {
        let dir = TempDir::new().unwrap();
        let data = b"0123456789abcdef".to_vec();
        let transport = Arc::new(MemoryTransport::new());
        transport.serve("mem://main/hero", data.clone());

        let options = fast_options().with_breakpoint_resume_file_size(8);
        let (mut dl, cache) = downloader(&dir, transport.clone(), &data, options);
        assert!(dl.is_resume());
        let temp = cache.layout().bundle_temp_path(&dl.request().bundle);
        fs::create_dir_all(temp.parent().unwrap()).unwrap();
        fs::write(&temp, &data[..6]).unwrap();

        dl.wait_for_async_complete();

        assert_eq!(dl.status(), OperationStatus::Succeed);
        assert_eq!(transport.range_starts(), vec![Some(6)]);
        assert_eq!(
            fs::read(cache.layout().bundle_data_path(&dl.request().bundle)).unwrap(),
            data
        );
    }

    #[test]
    fn test_clear_code_discards_partial_file() {
        let dir = TempDir::new().unwrap();
        let data = b"0123456789abcdef".to_vec();
        let transport = Arc::new(MemoryTransport::new());
        transport.serve("mem://main/hero", data.clone());
        transport.serve("mem://fallback/hero", data.clone());
        // First ranged request is rejected
        transport.reject_next_range(416);

        let options = fast_options().with_breakpoint_resume_file_size(8);
        let (mut dl, cache) = downloader(&dir, transport.clone(), &data, options);
        let temp = cache.layout().bundle_temp_path(&dl.request().bundle);
        fs::create_dir_all(temp.parent().unwrap()).unwrap();
        fs::write(&temp, b"XXXXXX").unwrap();

        dl.wait_for_async_complete();

        assert_eq!(dl.status(), OperationStatus::Succeed);
        assert_eq!(transport.range_starts(), vec![Some(6), None]);
        assert!(cache.is_bundle_cached(&dl.request().bundle));
    }

    #[test]
    fn test_abort_reports_user_abort() {
        let dir = TempDir::new().unwrap();
        let data = b"slow".to_vec();
        let transport = Arc::new(MemoryTransport::new());
        transport.serve("mem://main/hero", data.clone());

        let (mut dl, cache) = downloader(&dir, transport, &data, fast_options());
        dl.update();
        dl.abort();

        assert_eq!(dl.status(), OperationStatus::Failed);
        assert_eq!(dl.error(), Some("user abort"));
        assert!(!cache.layout().bundle_temp_path(&dl.request().bundle).exists());

        // Finished downloaders ignore further updates
        dl.update();
        assert_eq!(dl.step(), DownloaderStep::Failed);
    }

    #[test]
    fn test_stall_timeout_retries() {
        let dir = TempDir::new().unwrap();
        let data = b"stalled".to_vec();
        let transport = Arc::new(MemoryTransport::new());
        transport.stall("mem://main/hero");
        transport.serve("mem://fallback/hero", data.clone());

        let options = fast_options().with_timeout(Duration::from_millis(20));
        let (mut dl, _) = downloader(&dir, transport.clone(), &data, options);
        dl.wait_for_async_complete();

        assert_eq!(dl.status(), OperationStatus::Succeed);
        assert_eq!(transport.request_count(), 2);
    }

    #[test]
    fn test_resume_threshold() {
        let options = DownloaderOptions::default().with_breakpoint_resume_file_size(100);
        assert!(!options.use_resume(99));
        assert!(options.use_resume(100));
        assert!(!DownloaderOptions::default().use_resume(u64::MAX));
    }
}
