//! Content-addressed sandbox cache.
//!
//! Downloaded payloads live under a deterministic path derived from their
//! cache GUID (see [`CacheLayout`]). Each entry is a `__data` file plus an
//! `__info` record holding the CRC and size the data had when verified.
//!
//! [`CacheSystem`] owns the in-memory index. Entries are only indexed after
//! passing verification, either at start-up ([`FindCacheFilesOperation`] +
//! [`VerifyCacheFilesOperation`]) or when a download is committed.

mod clear;
mod error;
mod layout;
mod record;
mod system;
mod verifier;
mod verify;

pub use clear::{ClearCacheFilesOperation, ClearMode, CLEAR_FILES_PER_STEP};
pub use error::{CacheError, CacheResult};
pub use layout::{
    shard_prefix, temp_path_for, BuiltinLayout, CacheLayout, CACHE_DATA_FILE_NAME,
    CACHE_INFO_FILE_NAME, TEMP_FILE_SUFFIX,
};
pub use record::{read_info_file, write_info_file};
pub use system::{delete_file_root, CacheStats, CacheSystem, PackageCache, RecordWrapper};
pub use verifier::{
    FindCacheFilesOperation, VerifyCacheFilesOperation, VerifyTempFileOperation,
    SHARD_DIRS_PER_STEP,
};
pub use verify::{
    verify_file, Verifiable, VerifyCacheElement, VerifyExecutor, VerifyLevel, VerifyQueue,
    VerifyResult, VerifyTempElement, DEFAULT_SYNC_PER_STEP,
};
