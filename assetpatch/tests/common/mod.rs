//! Shared fixtures for integration tests.
//!
//! The "remote server" is a directory read through [`FileTransport`], wrapped
//! so tests can count what went over the wire.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use assetpatch::bundle::{
    manifest_binary_file_name, manifest_hash_file_name, version_file_name, OutputNameStyle,
    PatchAsset, PatchBundle,
};
use assetpatch::cache::BuiltinLayout;
use assetpatch::checksum::{bytes_sha256, crc32, format_crc};
use assetpatch::config::PackageConfig;
use assetpatch::download::{
    DownloadResult, FileTransport, PatchDownloaderOperation, Transport, TransportRequest,
    TransportResponse,
};
use assetpatch::manifest::{serialize, PatchManifest};
use assetpatch::operation::AsyncOperation;
use assetpatch::package::AssetsPackage;
use assetpatch::playmode::PlayModeKind;

pub const PACKAGE: &str = "DefaultPackage";

/// File transport that records every requested URL.
#[derive(Debug, Default)]
pub struct CountingTransport {
    inner: FileTransport,
    requests: Mutex<Vec<String>>,
}

impl CountingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn count_matching(&self, suffix: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|u| u.ends_with(suffix))
            .count()
    }

    pub fn reset(&self) {
        self.requests.lock().clear();
    }
}

impl Transport for CountingTransport {
    fn open(&self, request: &TransportRequest) -> DownloadResult<TransportResponse> {
        self.requests.lock().push(request.url.clone());
        self.inner.open(request)
    }
}

/// A bundle payload to publish.
#[derive(Debug, Clone)]
pub struct BundleSpec {
    pub name: String,
    pub hash: String,
    pub data: Vec<u8>,
    pub tags: Vec<String>,
}

impl BundleSpec {
    pub fn new(name: &str, hash: &str, data: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            hash: hash.to_string(),
            data: data.to_vec(),
            tags: Vec::new(),
        }
    }

    pub fn tagged(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    /// Address of the single asset stored in this bundle.
    pub fn address(&self) -> String {
        self.name.trim_end_matches(".bundle").to_string()
    }
}

/// One asset per bundle; every asset after the first depends on bundle 0.
pub fn build_manifest(version: &str, specs: &[BundleSpec]) -> PatchManifest {
    let bundles = specs
        .iter()
        .map(|s| {
            PatchBundle::new(&s.name, &s.hash, format_crc(crc32(&s.data)), s.data.len() as u64)
                .with_tags(s.tags.clone())
        })
        .collect();
    let assets = specs
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let deps = if i == 0 { vec![] } else { vec![0] };
            PatchAsset::new(s.address(), format!("Assets/{}.prefab", s.address()), i, deps)
        })
        .collect();
    PatchManifest::from_parts(true, OutputNameStyle::HashName, PACKAGE, version, assets, bundles)
        .unwrap()
}

fn write(path: &Path, data: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

/// Temp directories for the server, built-in payload and cache.
pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn server_root(&self) -> PathBuf {
        self.dir.path().join("server")
    }

    pub fn builtin_root(&self) -> PathBuf {
        self.dir.path().join("builtin")
    }

    pub fn cache_root(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    /// Publish a version on the server and make it current.
    pub fn publish_remote(&self, version: &str, specs: &[BundleSpec]) -> PatchManifest {
        let manifest = build_manifest(version, specs);
        let bytes = serialize(&manifest).unwrap();
        let root = self.server_root();

        write(&root.join(version_file_name(PACKAGE)), version.as_bytes());
        write(&root.join(manifest_binary_file_name(PACKAGE, version)), &bytes);
        write(
            &root.join(manifest_hash_file_name(PACKAGE, version)),
            bytes_sha256(&bytes).as_bytes(),
        );
        for (bundle, spec) in manifest.bundle_list.iter().zip(specs) {
            write(&root.join(bundle.file_name()), &spec.data);
        }
        manifest
    }

    /// Ship a version inside the application.
    pub fn publish_builtin(&self, version: &str, specs: &[BundleSpec]) -> PatchManifest {
        let manifest = build_manifest(version, specs);
        let layout = BuiltinLayout::new(self.builtin_root());

        write(&layout.version_file(PACKAGE), version.as_bytes());
        write(
            &layout.manifest_file(PACKAGE, version),
            &serialize(&manifest).unwrap(),
        );
        for (bundle, spec) in manifest.bundle_list.iter().zip(specs) {
            write(&layout.bundle_path(bundle), &spec.data);
        }
        manifest
    }

    pub fn config(&self, mode: PlayModeKind) -> PackageConfig {
        let server = self.server_root().to_string_lossy().into_owned();
        PackageConfig::new(PACKAGE)
            .with_play_mode(mode)
            .with_cache_root(self.cache_root())
            .with_builtin_root(self.builtin_root())
            .with_remote(server.clone(), server)
            .with_verify_threaded(false)
            .with_try_again_delay(Duration::from_millis(10))
    }

    pub fn package(&self, mode: PlayModeKind, transport: Arc<CountingTransport>) -> AssetsPackage {
        AssetsPackage::with_transport(self.config(mode), transport).unwrap()
    }
}

/// Run a download batch to completion, ticking the package alongside.
pub fn drive(package: &AssetsPackage, op: &mut PatchDownloaderOperation) {
    op.begin_download();
    while !op.is_done() {
        package.update();
        op.update();
        thread::sleep(Duration::from_millis(1));
    }
}

/// Initialize, fetch the remote version and switch to its manifest.
pub fn bring_up_to_date(package: &AssetsPackage) -> String {
    let mut init = package.initialize();
    init.wait_for_async_complete();
    assert!(init.error().is_none(), "{:?}", init.error());

    let mut version = package.update_package_version(false);
    version.wait_for_async_complete();
    let version = version.package_version().unwrap().to_string();

    let mut manifest = package.update_package_manifest(version.clone());
    manifest.wait_for_async_complete();
    assert!(manifest.error().is_none(), "{:?}", manifest.error());
    version
}
