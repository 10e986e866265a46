//! Cache index and atomic commit of downloaded files.
//!
//! [`CacheSystem`] is the only component that mutates the cache directory.
//! It keeps an in-memory [`PackageCache`] per package recording which cache
//! GUIDs have passed verification. A GUID is cached only while both its data
//! and info files exist and match; every path that invalidates an entry
//! removes both files together.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::error::{CacheError, CacheResult};
use super::layout::CacheLayout;
use super::record::write_info_file;
use crate::bundle::PatchBundle;

/// A verified cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordWrapper {
    pub info_file_path: PathBuf,
    pub data_file_path: PathBuf,
    pub data_file_crc: String,
    pub data_file_size: u64,
}

/// Verified entries of one package, keyed by cache GUID.
#[derive(Debug, Default)]
pub struct PackageCache {
    records: HashMap<String, RecordWrapper>,
}

impl PackageCache {
    pub fn is_cached(&self, cache_guid: &str) -> bool {
        self.records.contains_key(cache_guid)
    }

    /// Record an entry; returns `true` if the index changed.
    pub fn record(&mut self, cache_guid: &str, wrapper: RecordWrapper) -> bool {
        match self.records.get(cache_guid) {
            Some(existing) if *existing == wrapper => false,
            _ => {
                self.records.insert(cache_guid.to_string(), wrapper);
                true
            }
        }
    }

    pub fn discard(&mut self, cache_guid: &str) -> Option<RecordWrapper> {
        self.records.remove(cache_guid)
    }

    pub fn get(&self, cache_guid: &str) -> Option<&RecordWrapper> {
        self.records.get(cache_guid)
    }

    pub fn guids(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.records.values().map(|r| r.data_file_size).sum()
    }
}

/// Summary of a package's cache index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub files: usize,
    pub bytes: u64,
}

/// Shared cache index plus the filesystem operations that keep it honest.
#[derive(Debug)]
pub struct CacheSystem {
    layout: CacheLayout,
    packages: RwLock<HashMap<String, PackageCache>>,
}

impl CacheSystem {
    /// Create a cache system over `layout`; the index starts empty.
    pub fn new(layout: CacheLayout) -> Self {
        Self {
            layout,
            packages: RwLock::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn is_cached(&self, package: &str, cache_guid: &str) -> bool {
        self.packages
            .read()
            .get(package)
            .map(|p| p.is_cached(cache_guid))
            .unwrap_or(false)
    }

    /// Whether a bundle's content is in the cache index.
    pub fn is_bundle_cached(&self, bundle: &PatchBundle) -> bool {
        self.is_cached(bundle.package_name(), bundle.cache_guid())
    }

    /// Record a verified entry.
    pub fn record(&self, package: &str, cache_guid: &str, wrapper: RecordWrapper) {
        let changed = self
            .packages
            .write()
            .entry(package.to_string())
            .or_default()
            .record(cache_guid, wrapper);
        if changed {
            debug!(package, cache_guid, "Cache record added");
        }
    }

    pub fn record_of(&self, package: &str, cache_guid: &str) -> Option<RecordWrapper> {
        self.packages
            .read()
            .get(package)
            .and_then(|p| p.get(cache_guid).cloned())
    }

    /// Drop an entry from the index and delete its files.
    ///
    /// Files are removed even if the GUID was not indexed, so a half-written
    /// entry found on disk can be cleaned up the same way.
    pub fn discard(&self, package: &str, cache_guid: &str, is_raw: bool) {
        let removed = self
            .packages
            .write()
            .get_mut(package)
            .and_then(|p| p.discard(cache_guid));

        let file_root = match removed {
            Some(wrapper) => wrapper
                .data_file_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.layout.file_root(package, cache_guid, is_raw)),
            None => self.layout.file_root(package, cache_guid, is_raw),
        };
        delete_file_root(&file_root);
    }

    /// Promote a verified temp file into the cache.
    ///
    /// The info file is written first (atomically), then the data file is
    /// renamed into place, then the index is updated. A crash between steps
    /// leaves at most an info file without data, which is never reported as
    /// cached and is swept by the next verification pass.
    pub fn commit_temp_file(&self, bundle: &PatchBundle) -> CacheResult<()> {
        let temp = self.layout.bundle_temp_path(bundle);
        let data = self.layout.bundle_data_path(bundle);
        let info = self.layout.bundle_info_path(bundle);

        remove_if_exists(&data)?;
        remove_if_exists(&info)?;

        write_info_file(&info, &bundle.file_crc, bundle.file_size)?;

        if let Err(e) = fs::rename(&temp, &data) {
            let _ = fs::remove_file(&info);
            return Err(CacheError::MoveFailed {
                from: temp,
                to: data,
                source: e,
            });
        }

        self.record(
            bundle.package_name(),
            bundle.cache_guid(),
            RecordWrapper {
                info_file_path: info,
                data_file_path: data,
                data_file_crc: bundle.file_crc.clone(),
                data_file_size: bundle.file_size,
            },
        );
        Ok(())
    }

    /// GUIDs currently indexed for a package.
    pub fn cached_guids(&self, package: &str) -> Vec<String> {
        self.packages
            .read()
            .get(package)
            .map(PackageCache::guids)
            .unwrap_or_default()
    }

    /// Forget every entry of a package without touching files.
    pub fn clear_package_index(&self, package: &str) {
        self.packages.write().remove(package);
    }

    pub fn stats(&self, package: &str) -> CacheStats {
        self.packages
            .read()
            .get(package)
            .map(|p| CacheStats {
                files: p.len(),
                bytes: p.total_size(),
            })
            .unwrap_or_default()
    }
}

/// Delete a cache entry directory (data + info + any temp file).
pub fn delete_file_root(file_root: &Path) {
    match fs::remove_dir_all(file_root) {
        Ok(()) => debug!(path = %file_root.display(), "Cache entry deleted"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %file_root.display(), error = %e, "Failed to delete cache entry"),
    }
}

fn remove_if_exists(path: &Path) -> CacheResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::OutputNameStyle;
    use crate::cache::record::read_info_file;
    use crate::checksum::{crc32, format_crc};
    use tempfile::TempDir;

    fn bundle_for(data: &[u8], hash: &str) -> PatchBundle {
        let mut bundle =
            PatchBundle::new("a.bundle", hash, format_crc(crc32(data)), data.len() as u64);
        bundle.parse_bundle("pkg", OutputNameStyle::HashName);
        bundle
    }

    fn write_temp(system: &CacheSystem, bundle: &PatchBundle, data: &[u8]) {
        let temp = system.layout().bundle_temp_path(bundle);
        fs::create_dir_all(temp.parent().unwrap()).unwrap();
        fs::write(temp, data).unwrap();
    }

    #[test]
    fn test_commit_writes_data_info_and_index() {
        let dir = TempDir::new().unwrap();
        let system = CacheSystem::new(CacheLayout::new(dir.path()));
        let data = b"bundle payload";
        let bundle = bundle_for(data, "abcd01");
        write_temp(&system, &bundle, data);

        system.commit_temp_file(&bundle).unwrap();

        let layout = system.layout();
        assert!(system.is_bundle_cached(&bundle));
        assert_eq!(fs::read(layout.bundle_data_path(&bundle)).unwrap(), data);
        assert!(!layout.bundle_temp_path(&bundle).exists());
        let (crc, size) = read_info_file(&layout.bundle_info_path(&bundle)).unwrap();
        assert_eq!(crc, format_crc(crc32(data)));
        assert_eq!(size, data.len() as u64);
        assert_eq!(system.stats("pkg"), CacheStats { files: 1, bytes: 14 });
    }

    #[test]
    fn test_commit_without_temp_file_leaves_no_entry() {
        let dir = TempDir::new().unwrap();
        let system = CacheSystem::new(CacheLayout::new(dir.path()));
        let bundle = bundle_for(b"x", "abcd02");

        assert!(system.commit_temp_file(&bundle).is_err());

        assert!(!system.is_bundle_cached(&bundle));
        assert!(!system.layout().bundle_info_path(&bundle).exists());
        assert!(!system.layout().bundle_data_path(&bundle).exists());
    }

    #[test]
    fn test_discard_removes_both_files() {
        let dir = TempDir::new().unwrap();
        let system = CacheSystem::new(CacheLayout::new(dir.path()));
        let data = b"payload";
        let bundle = bundle_for(data, "abcd03");
        write_temp(&system, &bundle, data);
        system.commit_temp_file(&bundle).unwrap();

        system.discard("pkg", "abcd03", false);

        assert!(!system.is_bundle_cached(&bundle));
        assert!(!system.layout().bundle_file_root(&bundle).exists());
    }

    #[test]
    fn test_record_is_idempotent() {
        let mut cache = PackageCache::default();
        let wrapper = RecordWrapper {
            info_file_path: PathBuf::from("/i"),
            data_file_path: PathBuf::from("/d"),
            data_file_crc: "00000000".to_string(),
            data_file_size: 0,
        };
        assert!(cache.record("g", wrapper.clone()));
        assert!(!cache.record("g", wrapper));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_unknown_package_is_not_cached() {
        let system = CacheSystem::new(CacheLayout::new("/nowhere"));
        assert!(!system.is_cached("pkg", "abcd"));
        assert!(system.cached_guids("pkg").is_empty());
        assert_eq!(system.stats("pkg"), CacheStats::default());
    }
}
