//! Small in-memory fetches used by the update flow.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::download::{
    DownloadError, DownloadResult, RequestTarget, Transport, TransportRequest, WebRequest,
};

/// A memory request with a stall timeout.
#[derive(Debug)]
pub(crate) struct MemoryFetch {
    request: WebRequest,
    timeout: Duration,
    last_bytes: u64,
    last_progress_at: Instant,
    http_code: Option<u16>,
}

impl MemoryFetch {
    pub fn start(
        transport: Arc<dyn Transport>,
        url: String,
        timeout: Duration,
    ) -> DownloadResult<Self> {
        let request = WebRequest::start(
            transport,
            TransportRequest::new(url).with_timeout(timeout),
            RequestTarget::Memory,
        )?;
        Ok(Self {
            request,
            timeout,
            last_bytes: 0,
            last_progress_at: Instant::now(),
            http_code: None,
        })
    }

    pub fn url(&self) -> &str {
        self.request.url()
    }

    pub fn http_code(&self) -> Option<u16> {
        self.http_code
    }

    /// The body once the request finished, or its error.
    pub fn poll(&mut self) -> Option<DownloadResult<Vec<u8>>> {
        let received = self.request.received_bytes();
        if received != self.last_bytes {
            self.last_bytes = received;
            self.last_progress_at = Instant::now();
        }

        if !self.request.is_done() {
            if self.last_progress_at.elapsed() >= self.timeout {
                self.request.abort();
                return Some(Err(DownloadError::Timeout {
                    url: self.request.url().to_string(),
                    timeout_secs: self.timeout.as_secs(),
                }));
            }
            return None;
        }

        let outcome = self.request.take_outcome()?;
        self.http_code = outcome.http_code;
        Some(outcome.result.map(Option::unwrap_or_default))
    }
}
