//! Download orchestration.
//!
//! [`DownloadSystem`] owns one [`FileDownloader`] per cache GUID and ticks
//! them; [`PatchDownloaderOperation`] batches a download list on top of it
//! with bounded concurrency and progress callbacks. Bytes come from a
//! [`Transport`]: HTTP for remote content, the file system for built-in
//! content being unpacked into the cache.

mod downloader;
mod error;
mod operation;
mod request;
mod system;
mod transport;

pub use downloader::{
    DownloaderOptions, DownloaderStep, FileDownloader, DEFAULT_BREAKPOINT_RESUME_FILE_SIZE,
    DEFAULT_CLEAR_FILE_RESPONSE_CODES, DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_FAILED_TRY_AGAIN,
    DEFAULT_TRY_AGAIN_DELAY,
};
pub use error::{DownloadError, DownloadResult, USER_ABORT};
pub use operation::{
    DownloadProgress, FailedDownload, PatchDownloaderOperation, DEFAULT_DOWNLOADING_MAX_NUMBER,
};
pub use request::{RequestOutcome, RequestTarget, WebRequest};
pub use system::{DownloadSystem, DownloaderHandle};
pub use transport::{
    DispatchTransport, FileTransport, HttpTransport, Transport, TransportRequest,
    TransportResponse, DEFAULT_CONNECT_TIMEOUT,
};

use crate::bundle::PatchBundle;

/// One bundle to fetch and where to fetch it from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub bundle: PatchBundle,
    pub main_url: String,
    pub fallback_url: String,
}

impl DownloadRequest {
    pub fn new(
        bundle: PatchBundle,
        main_url: impl Into<String>,
        fallback_url: impl Into<String>,
    ) -> Self {
        Self {
            bundle,
            main_url: main_url.into(),
            fallback_url: fallback_url.into(),
        }
    }
}
