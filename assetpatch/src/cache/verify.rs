//! File verification primitives and the verification executor.
//!
//! A verify element carries the paths and expectations of one file into the
//! executor and comes back with its `result` filled in. The executor either
//! runs elements on a bounded `rayon` pool, posting finished elements to an
//! `mpsc` queue that the owning operation drains on its own thread, or runs
//! them inline a few per step. Both produce the same cache state for the same
//! inputs; the pool only adds throughput.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use super::error::{CacheError, CacheResult};
use super::record::read_info_file;
use crate::checksum::{crc_matches, file_crc32};

/// How thoroughly a cached file is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyLevel {
    /// Files exist.
    Low,
    /// Files exist and the size matches.
    Middle,
    /// Size and CRC-32 match.
    #[default]
    High,
}

impl FromStr for VerifyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "middle" => Ok(Self::Middle),
            "high" => Ok(Self::High),
            other => Err(format!("unknown verify level '{}'", other)),
        }
    }
}

impl fmt::Display for VerifyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Middle => write!(f, "middle"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Outcome of verifying one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerifyResult {
    Succeed,
    /// Data (or info) file is missing.
    NotFound,
    /// Info file cannot be decoded.
    InfoFileError,
    /// File is shorter than expected.
    FileNotComplete,
    /// File is longer than expected.
    FileOverflow,
    FileCrcError,
    /// An I/O error other than a missing file.
    Exception,
}

impl VerifyResult {
    pub fn is_success(&self) -> bool {
        *self == Self::Succeed
    }
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Succeed => "succeed",
            Self::NotFound => "file not found",
            Self::InfoFileError => "info file error",
            Self::FileNotComplete => "file not complete",
            Self::FileOverflow => "file overflow",
            Self::FileCrcError => "file crc error",
            Self::Exception => "io exception",
        };
        write!(f, "{}", name)
    }
}

/// Check a file's size and, at `High`, its CRC.
pub fn verify_file(
    path: &Path,
    expected_size: u64,
    expected_crc: &str,
    level: VerifyLevel,
) -> VerifyResult {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return VerifyResult::NotFound,
        Err(_) => return VerifyResult::Exception,
    };

    if level == VerifyLevel::Low {
        return VerifyResult::Succeed;
    }

    let size = metadata.len();
    if size < expected_size {
        return VerifyResult::FileNotComplete;
    }
    if size > expected_size {
        return VerifyResult::FileOverflow;
    }

    if level == VerifyLevel::High {
        return match file_crc32(path) {
            Ok(crc) if crc_matches(expected_crc, crc) => VerifyResult::Succeed,
            Ok(_) => VerifyResult::FileCrcError,
            Err(e) if e.kind() == io::ErrorKind::NotFound => VerifyResult::NotFound,
            Err(_) => VerifyResult::Exception,
        };
    }

    VerifyResult::Succeed
}

/// A cached entry found on disk, awaiting verification.
#[derive(Debug, Clone)]
pub struct VerifyCacheElement {
    pub package: String,
    pub cache_guid: String,
    pub is_raw: bool,
    pub file_root_path: PathBuf,
    pub data_file_path: PathBuf,
    pub info_file_path: PathBuf,
    /// CRC read from the info file.
    pub data_file_crc: String,
    /// Size read from the info file.
    pub data_file_size: u64,
    pub result: Option<VerifyResult>,
}

impl VerifyCacheElement {
    pub fn new(
        package: impl Into<String>,
        cache_guid: impl Into<String>,
        is_raw: bool,
        file_root_path: PathBuf,
        data_file_path: PathBuf,
        info_file_path: PathBuf,
    ) -> Self {
        Self {
            package: package.into(),
            cache_guid: cache_guid.into(),
            is_raw,
            file_root_path,
            data_file_path,
            info_file_path,
            data_file_crc: String::new(),
            data_file_size: 0,
            result: None,
        }
    }

    /// Verify the entry against its own info file.
    pub fn verify(&mut self, level: VerifyLevel) {
        let result = if level == VerifyLevel::Low {
            if self.info_file_path.exists() && self.data_file_path.exists() {
                VerifyResult::Succeed
            } else {
                VerifyResult::NotFound
            }
        } else {
            match read_info_file(&self.info_file_path) {
                Ok((crc, size)) => {
                    self.data_file_crc = crc;
                    self.data_file_size = size;
                    verify_file(&self.data_file_path, size, &self.data_file_crc, level)
                }
                Err(CacheError::ReadFailed { source, .. })
                    if source.kind() == io::ErrorKind::NotFound =>
                {
                    VerifyResult::NotFound
                }
                Err(_) => VerifyResult::InfoFileError,
            }
        };
        self.result = Some(result);
    }
}

/// A downloaded temp file awaiting verification before promotion.
#[derive(Debug, Clone)]
pub struct VerifyTempElement {
    pub temp_file_path: PathBuf,
    pub expected_crc: String,
    pub expected_size: u64,
    pub result: Option<VerifyResult>,
}

impl VerifyTempElement {
    pub fn new(
        temp_file_path: PathBuf,
        expected_crc: impl Into<String>,
        expected_size: u64,
    ) -> Self {
        Self {
            temp_file_path,
            expected_crc: expected_crc.into(),
            expected_size,
            result: None,
        }
    }

    /// Temp files are always checked at the highest level.
    pub fn verify(&mut self) {
        self.result = Some(verify_file(
            &self.temp_file_path,
            self.expected_size,
            &self.expected_crc,
            VerifyLevel::High,
        ));
    }
}

/// Work item accepted by the executor.
pub trait Verifiable: Send + 'static {
    fn run(&mut self, level: VerifyLevel);
}

impl Verifiable for VerifyCacheElement {
    fn run(&mut self, level: VerifyLevel) {
        self.verify(level);
    }
}

impl Verifiable for VerifyTempElement {
    fn run(&mut self, _level: VerifyLevel) {
        self.verify();
    }
}

/// Default number of elements verified per step without a pool.
pub const DEFAULT_SYNC_PER_STEP: usize = 8;

/// Where verification work runs.
#[derive(Clone)]
pub enum VerifyExecutor {
    /// Bounded worker pool; results are posted back to the owner.
    Threaded {
        pool: Arc<rayon::ThreadPool>,
        max_in_flight: usize,
    },
    /// Inline on the driving thread.
    Synchronous { per_step: usize },
}

impl fmt::Debug for VerifyExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Threaded { max_in_flight, .. } => f
                .debug_struct("Threaded")
                .field("max_in_flight", max_in_flight)
                .finish(),
            Self::Synchronous { per_step } => f
                .debug_struct("Synchronous")
                .field("per_step", per_step)
                .finish(),
        }
    }
}

impl VerifyExecutor {
    /// Build a pooled executor.
    ///
    /// The pool gets `min(available cores, max_concurrency)` threads, never
    /// fewer than one; at most that many elements are in flight at once.
    pub fn threaded(max_concurrency: usize) -> CacheResult<Self> {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let threads = cores.min(max_concurrency).max(1);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("cache-verify-{}", i))
            .build()
            .map_err(|e| CacheError::ThreadPool(e.to_string()))?;

        let max_in_flight = pool.current_num_threads().min(threads).max(1);
        Ok(Self::Threaded {
            pool: Arc::new(pool),
            max_in_flight,
        })
    }

    pub fn synchronous() -> Self {
        Self::Synchronous {
            per_step: DEFAULT_SYNC_PER_STEP,
        }
    }

    pub fn is_threaded(&self) -> bool {
        matches!(self, Self::Threaded { .. })
    }

    pub fn max_in_flight(&self) -> usize {
        match self {
            Self::Threaded { max_in_flight, .. } => *max_in_flight,
            Self::Synchronous { per_step } => *per_step,
        }
    }
}

/// Waiting list, in-flight count and result queue for one operation.
///
/// Elements are dispatched from the back of the waiting list, so completion
/// order does not follow input order.
#[derive(Debug)]
pub struct VerifyQueue<E: Verifiable> {
    executor: VerifyExecutor,
    level: VerifyLevel,
    waiting: Vec<E>,
    in_flight: usize,
    tx: Sender<E>,
    rx: Receiver<E>,
}

impl<E: Verifiable> VerifyQueue<E> {
    pub fn new(executor: VerifyExecutor, level: VerifyLevel, elements: Vec<E>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            executor,
            level,
            waiting: elements,
            in_flight: 0,
            tx,
            rx,
        }
    }

    /// Dispatch what the limits allow and return finished elements.
    pub fn poll(&mut self) -> Vec<E> {
        let mut finished = Vec::new();

        while let Ok(element) = self.rx.try_recv() {
            self.in_flight -= 1;
            finished.push(element);
        }

        match &self.executor {
            VerifyExecutor::Threaded {
                pool,
                max_in_flight,
            } => {
                while self.in_flight < *max_in_flight {
                    let Some(mut element) = self.waiting.pop() else {
                        break;
                    };
                    self.in_flight += 1;
                    let tx = self.tx.clone();
                    let level = self.level;
                    pool.spawn(move || {
                        element.run(level);
                        // Receiver gone means the owning operation was dropped
                        let _ = tx.send(element);
                    });
                }
            }
            VerifyExecutor::Synchronous { per_step } => {
                for _ in 0..(*per_step).max(1) {
                    let Some(mut element) = self.waiting.pop() else {
                        break;
                    };
                    element.run(self.level);
                    finished.push(element);
                }
            }
        }

        finished
    }

    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Nothing waiting and nothing in flight.
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty() && self.in_flight == 0
    }
}
