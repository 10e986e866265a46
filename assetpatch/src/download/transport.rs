//! Byte sources for downloads.
//!
//! A [`Transport`] opens a URL and hands back a status code plus a streaming
//! body. Non-success statuses are returned as responses, not errors, so the
//! downloader can decide what a 404 or 416 means for a partial file.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;

use super::downloader::DEFAULT_DOWNLOAD_TIMEOUT;
use super::error::{DownloadError, DownloadResult};

/// Default connect timeout for HTTP requests.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// One request to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub url: String,
    /// First byte wanted; `Some` sends a range request.
    pub range_start: Option<u64>,
    /// Stall timeout the caller enforces on byte progress.
    pub timeout: Duration,
}

impl TransportRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            range_start: None,
            timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_range_start(mut self, start: u64) -> Self {
        self.range_start = Some(start);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Status line and body of an opened request.
pub struct TransportResponse {
    /// HTTP status, or its file-system equivalent.
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

impl TransportResponse {
    pub fn new(status: u16, content_length: Option<u64>, body: Box<dyn Read + Send>) -> Self {
        Self {
            status,
            content_length,
            body,
        }
    }

    /// A body-less response carrying only a status.
    pub fn status_only(status: u16) -> Self {
        Self::new(status, Some(0), Box::new(io::empty()))
    }

    /// 200 or 206.
    pub fn is_success(&self) -> bool {
        self.status == 200 || self.status == 206
    }

    /// Whether the body starts at the requested range.
    pub fn is_partial(&self) -> bool {
        self.status == 206
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Opens URLs for reading.
pub trait Transport: Send + Sync + fmt::Debug {
    fn open(&self, request: &TransportRequest) -> DownloadResult<TransportResponse>;
}

/// Blocking HTTP(S) transport.
///
/// The blocking client applies its timeout to sending the request and to
/// each body read separately, so a stalled socket errors out while a slow
/// but steady transfer of a large file is never cut off.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    pub(crate) read_timeout: Duration,
}

impl HttpTransport {
    pub fn new() -> DownloadResult<Self> {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_DOWNLOAD_TIMEOUT)
    }

    /// `read_timeout` bounds the wait for headers and for every body read.
    pub fn with_timeouts(
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> DownloadResult<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(|e| DownloadError::RequestFailed {
                url: String::new(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            read_timeout,
        })
    }
}

impl Transport for HttpTransport {
    fn open(&self, request: &TransportRequest) -> DownloadResult<TransportResponse> {
        let mut builder = self.client.get(&request.url);
        if let Some(start) = request.range_start {
            builder = builder.header("Range", format!("bytes={}-", start));
        }

        let response = builder.send().map_err(|e| {
            if e.is_timeout() {
                DownloadError::Timeout {
                    url: request.url.clone(),
                    timeout_secs: self.read_timeout.as_secs(),
                }
            } else {
                DownloadError::RequestFailed {
                    url: request.url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        Ok(TransportResponse::new(status, content_length, Box::new(response)))
    }
}

/// Reads `file://` URLs and plain paths, used to unpack built-in content.
///
/// A missing file answers 404 and a range past the end answers 416, the same
/// codes an HTTP server would use.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTransport;

impl FileTransport {
    pub fn path_of(url: &str) -> PathBuf {
        PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
    }
}

impl Transport for FileTransport {
    fn open(&self, request: &TransportRequest) -> DownloadResult<TransportResponse> {
        let path = Self::path_of(&request.url);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(TransportResponse::status_only(404));
            }
            Err(e) => {
                return Err(DownloadError::RequestFailed {
                    url: request.url.clone(),
                    reason: e.to_string(),
                })
            }
        };

        let read_failed = |e: io::Error| DownloadError::RequestFailed {
            url: request.url.clone(),
            reason: e.to_string(),
        };
        let len = file.metadata().map_err(read_failed)?.len();

        match request.range_start {
            Some(start) if start > 0 => {
                if start >= len {
                    return Ok(TransportResponse::status_only(416));
                }
                file.seek(SeekFrom::Start(start)).map_err(read_failed)?;
                Ok(TransportResponse::new(206, Some(len - start), Box::new(file)))
            }
            _ => Ok(TransportResponse::new(200, Some(len), Box::new(file))),
        }
    }
}

/// Routes HTTP(S) URLs to one transport and everything else to another.
#[derive(Debug, Clone)]
pub struct DispatchTransport {
    http: Arc<dyn Transport>,
    file: Arc<dyn Transport>,
}

impl DispatchTransport {
    pub fn new(http: Arc<dyn Transport>, file: Arc<dyn Transport>) -> Self {
        Self { http, file }
    }

    /// HTTP via `reqwest`, files via [`FileTransport`].
    ///
    /// `read_timeout` is normally the downloader's stall timeout.
    pub fn standard(read_timeout: Duration) -> DownloadResult<Self> {
        let http = HttpTransport::with_timeouts(DEFAULT_CONNECT_TIMEOUT, read_timeout)?;
        Ok(Self::new(Arc::new(http), Arc::new(FileTransport)))
    }
}

impl Transport for DispatchTransport {
    fn open(&self, request: &TransportRequest) -> DownloadResult<TransportResponse> {
        let lower = request.url.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            self.http.open(request)
        } else if lower.starts_with("file://") || !lower.contains("://") {
            self.file.open(request)
        } else {
            Err(DownloadError::UnsupportedScheme(request.url.clone()))
        }
    }
}
