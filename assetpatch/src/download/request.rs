//! Background web requests.
//!
//! A [`WebRequest`] runs one transport request on its own thread and streams
//! the body into a file or into memory. The owner polls it from its update
//! loop: byte counters are atomics and the outcome lands in a shared slot.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::error::{DownloadError, DownloadResult};
use super::transport::{Transport, TransportRequest};

/// Buffer size for streaming bodies (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Where the body of a request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    /// Stream into a file, appending when `append` is set and the server
    /// honours the range.
    File { path: PathBuf, append: bool },
    /// Collect into a buffer.
    Memory,
}

/// Final state of a request.
#[derive(Debug)]
pub struct RequestOutcome {
    /// Status code, if the transport got that far.
    pub http_code: Option<u16>,
    /// Body bytes for memory targets, `None` for file targets.
    pub result: DownloadResult<Option<Vec<u8>>>,
}

#[derive(Debug, Default)]
struct RequestShared {
    received: AtomicU64,
    content_length: AtomicU64,
    aborted: AtomicBool,
    /// Held across every file write and while aborting, so no write lands
    /// once `abort` has returned.
    write_gate: Mutex<()>,
    done: AtomicBool,
    outcome: Mutex<Option<RequestOutcome>>,
}

impl RequestShared {
    fn abort(&self) {
        let _gate = self.write_gate.lock();
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// File writer that refuses to write after the request was aborted.
///
/// A retry reuses the same temp path, so a worker still blocked in a read
/// must not touch the file once the owner moved on.
struct GatedFile<'a> {
    file: File,
    shared: &'a RequestShared,
}

impl Write for GatedFile<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _gate = self.shared.write_gate.lock();
        if self.shared.is_aborted() {
            return Err(io::Error::other("request aborted"));
        }
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let _gate = self.shared.write_gate.lock();
        if self.shared.is_aborted() {
            return Err(io::Error::other("request aborted"));
        }
        self.file.flush()
    }
}

/// A transport request running on a background thread.
#[derive(Debug)]
pub struct WebRequest {
    url: String,
    shared: Arc<RequestShared>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WebRequest {
    /// Start a request.
    pub fn start(
        transport: Arc<dyn Transport>,
        request: TransportRequest,
        target: RequestTarget,
    ) -> DownloadResult<Self> {
        let shared = Arc::new(RequestShared::default());
        let url = request.url.clone();

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("web-request".to_string())
            .spawn(move || {
                let outcome = run_request(transport.as_ref(), &request, &target, &worker_shared);
                *worker_shared.outcome.lock() = Some(outcome);
                worker_shared.done.store(true, Ordering::SeqCst);
            })
            .map_err(|e| DownloadError::Thread(e.to_string()))?;

        debug!(url = %url, "Web request started");
        Ok(Self {
            url,
            shared,
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Bytes received by this request (not counting resumed bytes).
    pub fn received_bytes(&self) -> u64 {
        self.shared.received.load(Ordering::SeqCst)
    }

    /// Content length announced by the server, 0 if unknown.
    pub fn content_length(&self) -> u64 {
        self.shared.content_length.load(Ordering::SeqCst)
    }

    pub fn is_done(&self) -> bool {
        self.shared.done.load(Ordering::SeqCst)
    }

    /// Take the outcome once the request is done.
    pub fn take_outcome(&mut self) -> Option<RequestOutcome> {
        if !self.is_done() {
            return None;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.shared.outcome.lock().take()
    }

    /// Stop the request.
    ///
    /// The worker notices between chunks; the handle is released at once so
    /// the owner never waits on a blocked read.
    pub fn abort(&mut self) {
        self.shared.abort();
        self.handle.take();
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.is_aborted()
    }
}

impl Drop for WebRequest {
    fn drop(&mut self) {
        if !self.is_done() {
            self.shared.abort();
        }
    }
}

fn run_request(
    transport: &dyn Transport,
    request: &TransportRequest,
    target: &RequestTarget,
    shared: &RequestShared,
) -> RequestOutcome {
    let response = match transport.open(request) {
        Ok(r) => r,
        Err(e) => {
            return RequestOutcome {
                http_code: None,
                result: Err(e),
            }
        }
    };

    let code = response.status;
    if !response.is_success() {
        return RequestOutcome {
            http_code: Some(code),
            result: Err(DownloadError::HttpStatus {
                url: request.url.clone(),
                code,
            }),
        };
    }
    shared
        .content_length
        .store(response.content_length.unwrap_or(0), Ordering::SeqCst);

    let result = match target {
        RequestTarget::File { path, append } => {
            // A server that ignores the range sends the whole file
            let append = *append && request.range_start.is_some() && response.is_partial();
            stream_to_file(response.body, path, append, &request.url, shared).map(|_| None)
        }
        RequestTarget::Memory => {
            let mut buffer = Vec::new();
            stream_body(response.body, &mut buffer, &request.url, shared).map(|_| Some(buffer))
        }
    };

    RequestOutcome {
        http_code: Some(code),
        result,
    }
}

fn stream_to_file(
    body: Box<dyn Read + Send>,
    path: &Path,
    append: bool,
    url: &str,
    shared: &RequestShared,
) -> DownloadResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| DownloadError::CreateDirFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let file = {
        // Opening truncates, so it must not race a newer attempt either
        let _gate = shared.write_gate.lock();
        if shared.is_aborted() {
            return Err(DownloadError::Aborted);
        }
        let opened = if append {
            OpenOptions::new().create(true).append(true).open(path)
        } else {
            File::create(path)
        };
        opened.map_err(|e| DownloadError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?
    };

    let mut writer = BufWriter::new(GatedFile { file, shared });
    stream_body(body, &mut writer, url, shared).map_err(|e| match e {
        DownloadError::WriteFailed { source, .. } => DownloadError::WriteFailed {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })?;
    writer.flush().map_err(|e| {
        if shared.is_aborted() {
            DownloadError::Aborted
        } else {
            DownloadError::WriteFailed {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })
}

fn stream_body<W: Write>(
    mut body: Box<dyn Read + Send>,
    writer: &mut W,
    url: &str,
    shared: &RequestShared,
) -> DownloadResult<()> {
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        if shared.is_aborted() {
            trace!(url, "Web request aborted");
            return Err(DownloadError::Aborted);
        }

        let bytes_read = body.read(&mut buffer).map_err(|e| DownloadError::RequestFailed {
            url: url.to_string(),
            reason: format!("Read error: {}", e),
        })?;
        if bytes_read == 0 {
            return Ok(());
        }
        // The read may have blocked across an abort
        if shared.is_aborted() {
            trace!(url, "Web request aborted during read");
            return Err(DownloadError::Aborted);
        }

        writer.write_all(&buffer[..bytes_read]).map_err(|e| {
            if shared.is_aborted() {
                DownloadError::Aborted
            } else {
                DownloadError::WriteFailed {
                    path: PathBuf::new(),
                    source: e,
                }
            }
        })?;
        shared
            .received
            .fetch_add(bytes_read as u64, Ordering::SeqCst);
    }
}
