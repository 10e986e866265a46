//! Deterministic on-disk layout of the cache and the built-in payload.
//!
//! ```text
//! {cache_root}/{package}/CacheFiles/BundleFiles/{hash[0..2]}/{hash}/__data
//! {cache_root}/{package}/CacheFiles/BundleFiles/{hash[0..2]}/{hash}/__info
//! {cache_root}/{package}/CacheFiles/RawFiles/{hash[0..2]}/{hash}/__data
//! {cache_root}/{package}/ManifestFiles/PatchManifest_{package}_{version}.bytes
//! {builtin_root}/{package}/{file_name}
//! ```
//!
//! Every path is a pure function of the package name, the cache GUID (file
//! hash) and whether the bundle is a raw file.

use std::path::{Path, PathBuf};

use crate::bundle::{
    manifest_binary_file_name, manifest_hash_file_name, version_file_name, PatchBundle,
};

/// File name of a cached payload.
pub const CACHE_DATA_FILE_NAME: &str = "__data";

/// File name of a cached payload's info record.
pub const CACHE_INFO_FILE_NAME: &str = "__info";

/// Suffix appended to a data file path while it is being downloaded.
pub const TEMP_FILE_SUFFIX: &str = ".temp";

const CACHE_FILES_DIR: &str = "CacheFiles";
const BUNDLE_FILES_DIR: &str = "BundleFiles";
const RAW_FILES_DIR: &str = "RawFiles";
const MANIFEST_FILES_DIR: &str = "ManifestFiles";

/// Two-character shard directory for a cache GUID.
pub fn shard_prefix(cache_guid: &str) -> &str {
    cache_guid.get(..2).unwrap_or(cache_guid)
}

/// Path builder for the sandbox cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    /// Create a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn package_root(&self, package: &str) -> PathBuf {
        self.root.join(package)
    }

    /// Root holding cached bundle or raw files of a package.
    pub fn files_root(&self, package: &str, is_raw: bool) -> PathBuf {
        let kind = if is_raw { RAW_FILES_DIR } else { BUNDLE_FILES_DIR };
        self.package_root(package).join(CACHE_FILES_DIR).join(kind)
    }

    /// Directory holding one cached entry (`__data` + `__info`).
    pub fn file_root(&self, package: &str, cache_guid: &str, is_raw: bool) -> PathBuf {
        self.files_root(package, is_raw)
            .join(shard_prefix(cache_guid))
            .join(cache_guid)
    }

    pub fn data_file_path(&self, package: &str, cache_guid: &str, is_raw: bool) -> PathBuf {
        self.file_root(package, cache_guid, is_raw)
            .join(CACHE_DATA_FILE_NAME)
    }

    pub fn info_file_path(&self, package: &str, cache_guid: &str, is_raw: bool) -> PathBuf {
        self.file_root(package, cache_guid, is_raw)
            .join(CACHE_INFO_FILE_NAME)
    }

    pub fn temp_file_path(&self, package: &str, cache_guid: &str, is_raw: bool) -> PathBuf {
        temp_path_for(&self.data_file_path(package, cache_guid, is_raw))
    }

    pub fn bundle_file_root(&self, bundle: &PatchBundle) -> PathBuf {
        self.file_root(bundle.package_name(), bundle.cache_guid(), bundle.is_raw_file)
    }

    pub fn bundle_data_path(&self, bundle: &PatchBundle) -> PathBuf {
        self.data_file_path(bundle.package_name(), bundle.cache_guid(), bundle.is_raw_file)
    }

    pub fn bundle_info_path(&self, bundle: &PatchBundle) -> PathBuf {
        self.info_file_path(bundle.package_name(), bundle.cache_guid(), bundle.is_raw_file)
    }

    pub fn bundle_temp_path(&self, bundle: &PatchBundle) -> PathBuf {
        self.temp_file_path(bundle.package_name(), bundle.cache_guid(), bundle.is_raw_file)
    }

    pub fn manifest_files_root(&self, package: &str) -> PathBuf {
        self.package_root(package).join(MANIFEST_FILES_DIR)
    }

    /// Cached copy of the package version file.
    pub fn cached_version_file(&self, package: &str) -> PathBuf {
        self.manifest_files_root(package)
            .join(version_file_name(package))
    }

    pub fn cached_manifest_file(&self, package: &str, version: &str) -> PathBuf {
        self.manifest_files_root(package)
            .join(manifest_binary_file_name(package, version))
    }

    pub fn cached_hash_file(&self, package: &str, version: &str) -> PathBuf {
        self.manifest_files_root(package)
            .join(manifest_hash_file_name(package, version))
    }
}

/// Path builder for content shipped with the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinLayout {
    root: PathBuf,
}

impl BuiltinLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bundle_path(&self, bundle: &PatchBundle) -> PathBuf {
        self.root.join(bundle.package_name()).join(bundle.file_name())
    }

    pub fn version_file(&self, package: &str) -> PathBuf {
        self.root.join(package).join(version_file_name(package))
    }

    pub fn manifest_file(&self, package: &str, version: &str) -> PathBuf {
        self.root
            .join(package)
            .join(manifest_binary_file_name(package, version))
    }
}

/// Temp path used while a file is being written.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(TEMP_FILE_SUFFIX);
    PathBuf::from(os)
}
