//! Package facade.
//!
//! An [`AssetsPackage`] ties one package's configuration to its play mode,
//! cache, download system, remote endpoints and active manifest, and hands
//! out the operations that act on them. Operations are returned un-started;
//! the host drives them (and [`AssetsPackage::update`]) from its own loop.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::cache::{
    BuiltinLayout, CacheError, CacheLayout, CacheStats, CacheSystem, ClearCacheFilesOperation,
    VerifyExecutor,
};
use crate::config::PackageConfig;
use crate::download::{
    DispatchTransport, DownloadError, DownloadRequest, DownloadSystem, PatchDownloaderOperation,
    Transport,
};
use crate::manifest::{PatchManifest, ResolveError};
use crate::playmode::{
    BuiltinSlot, BundleInfo, HostPlayMode, OfflinePlayMode, PlayMode, PlayModeKind,
    SimulatePlayMode,
};
use crate::update::{
    ActiveManifest, InitializeOperation, InitializeParameters, RemoteServices,
    UpdatePackageManifestOperation, UpdatePackageVersionOperation,
};

/// Result type for package construction.
pub type PackageResult<T> = Result<T, PackageError>;

/// Errors raised while assembling a package.
#[derive(Debug, Error)]
pub enum PackageError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Simulate mode was selected without a source tree.
    #[error("simulate mode requires a simulate root for package {0}")]
    MissingSimulateRoot(String),
}

/// One asset package and everything needed to keep it current.
#[derive(Debug)]
pub struct AssetsPackage {
    config: PackageConfig,
    play_mode: Arc<dyn PlayMode>,
    cache: Arc<CacheSystem>,
    downloads: Arc<DownloadSystem>,
    transport: Arc<dyn Transport>,
    remote: Arc<RemoteServices>,
    active: ActiveManifest,
    builtin: BuiltinSlot,
    executor: VerifyExecutor,
}

impl AssetsPackage {
    /// Create a package using HTTP for remote content and the file system for
    /// built-in content.
    pub fn new(config: PackageConfig) -> PackageResult<Self> {
        let transport: Arc<dyn Transport> =
            Arc::new(DispatchTransport::standard(config.downloader.timeout)?);
        Self::with_transport(config, transport)
    }

    /// Create a package over a caller-supplied transport.
    pub fn with_transport(
        config: PackageConfig,
        transport: Arc<dyn Transport>,
    ) -> PackageResult<Self> {
        let executor = if config.verify_threaded {
            VerifyExecutor::threaded(config.verify_max_concurrency)?
        } else {
            VerifyExecutor::synchronous()
        };
        let cache = Arc::new(CacheSystem::new(CacheLayout::new(&config.cache_root)));
        let remote = Arc::new(RemoteServices::new(
            config.main_url.clone(),
            config.fallback_url.clone(),
        ));
        let builtin = BuiltinSlot::default();

        let play_mode: Arc<dyn PlayMode> = match config.play_mode {
            PlayModeKind::Host => Arc::new(HostPlayMode::new(
                cache.clone(),
                builtin.clone(),
                remote.clone(),
                config.include_untagged_bundles,
            )),
            PlayModeKind::Offline => Arc::new(OfflinePlayMode::new(cache.clone(), builtin.clone())),
            PlayModeKind::Simulate => {
                let root = config
                    .simulate_root
                    .clone()
                    .ok_or_else(|| PackageError::MissingSimulateRoot(config.package_name.clone()))?;
                Arc::new(SimulatePlayMode::new(root))
            }
        };

        let downloads = Arc::new(DownloadSystem::new(
            cache.clone(),
            transport.clone(),
            executor.clone(),
            config.downloader.clone(),
        ));

        info!(
            package = %config.package_name,
            mode = %config.play_mode,
            cache = %config.cache_root.display(),
            "Package created"
        );

        Ok(Self {
            config,
            play_mode,
            cache,
            downloads,
            transport,
            remote,
            active: ActiveManifest::new(),
            builtin,
            executor,
        })
    }

    pub fn package_name(&self) -> &str {
        &self.config.package_name
    }

    pub fn config(&self) -> &PackageConfig {
        &self.config
    }

    pub fn play_mode(&self) -> PlayModeKind {
        self.play_mode.kind()
    }

    pub fn cache(&self) -> &Arc<CacheSystem> {
        &self.cache
    }

    pub fn download_system(&self) -> &Arc<DownloadSystem> {
        &self.downloads
    }

    /// Scan the cache and adopt whatever manifest is on disk.
    pub fn initialize(&self) -> InitializeOperation {
        InitializeOperation::new(InitializeParameters {
            package: self.config.package_name.clone(),
            play_mode: self.config.play_mode,
            cache: self.cache.clone(),
            builtin_layout: self.config.builtin_root.clone().map(BuiltinLayout::new),
            builtin_slot: self.builtin.clone(),
            active: self.active.clone(),
            executor: self.executor.clone(),
            verify_level: self.config.verify_level,
            location_to_lower: self.config.location_to_lower,
            records_per_step: self.config.records_per_step,
        })
    }

    /// Fetch the latest version string from the remote server.
    pub fn update_package_version(&self, append_time_ticks: bool) -> UpdatePackageVersionOperation {
        UpdatePackageVersionOperation::new(
            self.remote.clone(),
            self.transport.clone(),
            self.config.package_name.clone(),
            append_time_ticks,
            self.config.downloader.timeout,
        )
    }

    /// Switch to the manifest of `version`.
    pub fn update_package_manifest(
        &self,
        version: impl Into<String>,
    ) -> UpdatePackageManifestOperation {
        UpdatePackageManifestOperation::new(
            self.remote.clone(),
            self.transport.clone(),
            self.cache.layout().clone(),
            self.active.clone(),
            self.config.package_name.clone(),
            version,
            self.config.location_to_lower,
            self.config.records_per_step,
            self.config.downloader.timeout,
        )
    }

    /// Version of the active manifest.
    pub fn package_version(&self) -> Option<String> {
        self.active.version()
    }

    pub fn active_manifest(&self) -> Option<Arc<PatchManifest>> {
        self.active.get()
    }

    fn manifest(&self) -> Result<Arc<PatchManifest>, ResolveError> {
        self.active.get().ok_or(ResolveError::NoActiveManifest)
    }

    /// Map a location (path or address) to its asset path.
    pub fn asset_path(&self, location: &str) -> Result<String, ResolveError> {
        self.manifest()?.map_to_asset_path(location)
    }

    /// Where the bundle owning `location` loads from.
    pub fn bundle_info(&self, location: &str) -> Result<BundleInfo, ResolveError> {
        let manifest = self.manifest()?;
        let asset_path = manifest.map_to_asset_path(location)?;
        self.play_mode.bundle_info(&manifest, &asset_path)
    }

    /// Where every dependency bundle of `location` loads from.
    pub fn dependencies(&self, location: &str) -> Result<Vec<BundleInfo>, ResolveError> {
        let manifest = self.manifest()?;
        let asset_path = manifest.map_to_asset_path(location)?;
        self.play_mode.all_dependencies(&manifest, &asset_path)
    }

    pub fn create_patch_downloader_by_all(&self) -> Result<PatchDownloaderOperation, ResolveError> {
        let manifest = self.manifest()?;
        let list = self.play_mode.download_list_by_all(&manifest);
        Ok(self.downloader_for(list, BundleInfo::download_request))
    }

    pub fn create_patch_downloader_by_tags(
        &self,
        tags: &[String],
    ) -> Result<PatchDownloaderOperation, ResolveError> {
        let manifest = self.manifest()?;
        let list = self.play_mode.download_list_by_tags(&manifest, tags);
        Ok(self.downloader_for(list, BundleInfo::download_request))
    }

    /// Download the bundles behind `locations` and their dependencies.
    pub fn create_patch_downloader_by_paths(
        &self,
        locations: &[String],
    ) -> Result<PatchDownloaderOperation, ResolveError> {
        let manifest = self.manifest()?;
        let asset_paths = locations
            .iter()
            .map(|l| manifest.map_to_asset_path(l))
            .collect::<Result<Vec<_>, _>>()?;
        let list = self.play_mode.download_list_by_paths(&manifest, &asset_paths)?;
        Ok(self.downloader_for(list, BundleInfo::download_request))
    }

    /// Copy built-in bundles into the cache.
    pub fn create_patch_unpacker_by_all(&self) -> Result<PatchDownloaderOperation, ResolveError> {
        let manifest = self.manifest()?;
        let list = self.play_mode.unpack_list_by_all(&manifest);
        Ok(self.downloader_for(list, BundleInfo::unpack_request))
    }

    pub fn create_patch_unpacker_by_tags(
        &self,
        tags: &[String],
    ) -> Result<PatchDownloaderOperation, ResolveError> {
        let manifest = self.manifest()?;
        let list = self.play_mode.unpack_list_by_tags(&manifest, tags);
        Ok(self.downloader_for(list, BundleInfo::unpack_request))
    }

    fn downloader_for(
        &self,
        list: Vec<BundleInfo>,
        to_request: fn(&BundleInfo) -> Option<DownloadRequest>,
    ) -> PatchDownloaderOperation {
        let requests: Vec<_> = list.iter().filter_map(to_request).collect();
        PatchDownloaderOperation::new(
            self.downloads.clone(),
            requests,
            self.config.max_concurrent_downloads,
        )
    }

    /// Delete cached files the active manifest no longer references.
    pub fn clear_unused_cache_files(&self) -> Result<ClearCacheFilesOperation, ResolveError> {
        let manifest = self.manifest()?;
        Ok(ClearCacheFilesOperation::unused(
            self.cache.clone(),
            self.config.package_name.clone(),
            manifest,
        ))
    }

    /// Delete every cached file of this package.
    pub fn clear_all_cache_files(&self) -> ClearCacheFilesOperation {
        ClearCacheFilesOperation::all(self.cache.clone(), self.config.package_name.clone())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats(&self.config.package_name)
    }

    /// Tick shared download work. Call once per frame.
    pub fn update(&self) {
        self.downloads.update();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{OutputNameStyle, PatchAsset, PatchBundle};
    use crate::checksum::{bytes_sha256, crc32, format_crc};
    use crate::download::test_support::MemoryTransport;
    use crate::manifest::serialize;
    use crate::operation::{AsyncOperation, OperationStatus};
    use crate::playmode::LoadSource;
    use tempfile::TempDir;

    const MAIN: &str = "http://main/cdn";
    const BACKUP: &str = "http://backup/cdn";

    fn serve_everywhere(transport: &MemoryTransport, file: &str, data: Vec<u8>) {
        transport.serve(&format!("{}/{}", MAIN, file), data.clone());
        transport.serve(&format!("{}/{}", BACKUP, file), data);
    }

    /// Publish a two-bundle manifest and its payloads.
    fn publish(transport: &MemoryTransport, version: &str) {
        let core = b"core payload".to_vec();
        let ui = b"ui payload, somewhat longer".to_vec();
        let bundles = vec![
            PatchBundle::new("core.bundle", "c0de", format_crc(crc32(&core)), core.len() as u64),
            PatchBundle::new("ui.bundle", "u1u1", format_crc(crc32(&ui)), ui.len() as u64)
                .with_tags(["ui"]),
        ];
        let assets = vec![
            PatchAsset::new("boot", "Assets/Boot.asset", 0, vec![]),
            PatchAsset::new("menu", "Assets/UI/Menu.prefab", 1, vec![0]),
        ];
        let manifest = PatchManifest::from_parts(
            true,
            OutputNameStyle::HashName,
            "DefaultPackage",
            version,
            assets,
            bundles,
        )
        .unwrap();
        let bytes = serialize(&manifest).unwrap();

        serve_everywhere(
            transport,
            "PatchManifest_DefaultPackage.version",
            version.as_bytes().to_vec(),
        );
        serve_everywhere(
            transport,
            &format!("PatchManifest_DefaultPackage_{}.hash", version),
            bytes_sha256(&bytes).into_bytes(),
        );
        serve_everywhere(
            transport,
            &format!("PatchManifest_DefaultPackage_{}.bytes", version),
            bytes,
        );
        serve_everywhere(transport, "c0de.bundle", core);
        serve_everywhere(transport, "u1u1.bundle", ui);
    }

    fn package(dir: &TempDir, transport: Arc<MemoryTransport>) -> AssetsPackage {
        let config = PackageConfig::new("DefaultPackage")
            .with_cache_root(dir.path().join("cache"))
            .with_remote(MAIN, BACKUP)
            .with_verify_threaded(false);
        AssetsPackage::with_transport(config, transport).unwrap()
    }

    fn drive(package: &AssetsPackage, op: &mut PatchDownloaderOperation) {
        op.begin_download();
        while !op.is_done() {
            package.update();
            op.update();
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    #[test]
    fn test_lookups_need_a_manifest() {
        let dir = TempDir::new().unwrap();
        let package = package(&dir, Arc::new(MemoryTransport::new()));

        assert!(package.package_version().is_none());
        assert!(matches!(
            package.bundle_info("menu"),
            Err(ResolveError::NoActiveManifest)
        ));
        assert!(package.create_patch_downloader_by_all().is_err());
    }

    #[test]
    fn test_host_update_and_download_flow() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MemoryTransport::new());
        publish(&transport, "v7");
        let package = package(&dir, transport);

        let mut init = package.initialize();
        init.wait_for_async_complete();
        assert_eq!(init.status(), OperationStatus::Succeed);

        let mut version = package.update_package_version(false);
        version.wait_for_async_complete();
        assert_eq!(version.package_version(), Some("v7"));

        let mut manifest = package.update_package_manifest("v7");
        manifest.wait_for_async_complete();
        assert_eq!(manifest.status(), OperationStatus::Succeed, "{:?}", manifest.error());
        assert_eq!(package.package_version().as_deref(), Some("v7"));
        assert_eq!(package.asset_path("menu").unwrap(), "Assets/UI/Menu.prefab");

        let info = package.bundle_info("menu").unwrap();
        assert_eq!(info.source, LoadSource::Remote);

        let mut downloader = package
            .create_patch_downloader_by_tags(&["ui".to_string()])
            .unwrap();
        assert_eq!(downloader.total_download_count(), 2);
        drive(&package, &mut downloader);
        assert_eq!(downloader.status(), OperationStatus::Succeed, "{:?}", downloader.error());

        assert_eq!(package.bundle_info("menu").unwrap().source, LoadSource::Cache);
        let deps = package.dependencies("menu").unwrap();
        assert!(deps.iter().all(|d| d.source == LoadSource::Cache));
        assert_eq!(package.cache_stats().files, 2);

        // Nothing left to fetch
        let again = package.create_patch_downloader_by_all().unwrap();
        assert_eq!(again.total_download_count(), 0);
    }

    #[test]
    fn test_clear_all_cache_files() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MemoryTransport::new());
        publish(&transport, "v1");
        let package = package(&dir, transport);

        package.update_package_manifest("v1").wait_for_async_complete();
        let mut downloader = package.create_patch_downloader_by_all().unwrap();
        drive(&package, &mut downloader);
        assert_eq!(package.cache_stats().files, 2);

        let mut unused = package.clear_unused_cache_files().unwrap();
        unused.wait_for_async_complete();
        assert_eq!(unused.cleared_count(), 0);

        let mut clear = package.clear_all_cache_files();
        clear.wait_for_async_complete();
        assert_eq!(package.cache_stats().files, 0);
        assert_eq!(package.bundle_info("boot").unwrap().source, LoadSource::Remote);
    }

    #[test]
    fn test_simulate_requires_root() {
        let dir = TempDir::new().unwrap();
        let config = PackageConfig::new("DefaultPackage")
            .with_cache_root(dir.path())
            .with_play_mode(PlayModeKind::Simulate)
            .with_verify_threaded(false);
        let err =
            AssetsPackage::with_transport(config, Arc::new(MemoryTransport::new())).unwrap_err();
        assert!(matches!(err, PackageError::MissingSimulateRoot(_)));
    }
}
