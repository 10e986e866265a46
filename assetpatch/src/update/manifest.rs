use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::error::UpdateError;
use super::fetch::MemoryFetch;
use super::remote::RemoteServices;
use super::version::MAX_REQUEST_ATTEMPTS;
use super::version_file::{write_file_atomic, write_version_file};
use super::{prepare_manifest, ActiveManifest};
use crate::bundle::{
    is_valid_package_version, manifest_binary_file_name, manifest_hash_file_name,
};
use crate::cache::CacheLayout;
use crate::checksum::{bytes_sha256, file_sha256};
use crate::download::Transport;
use crate::manifest::DeserializeManifestOperation;
use crate::operation::{AsyncOperation, OperationStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManifestStep {
    None,
    CheckActive,
    RequestHash,
    WaitHash,
    LoadCached,
    RequestManifest,
    WaitManifest,
    Deserialize,
    Done,
}

/// Move a package to the manifest of a given version.
///
/// The remote hash file is always fetched. A cached manifest whose SHA-256
/// matches it is reused; anything else is downloaded, checked against the
/// hash and saved before decoding. The version file is only written once the
/// decoded manifest has been adopted.
#[derive(Debug)]
pub struct UpdatePackageManifestOperation {
    remote: Arc<RemoteServices>,
    transport: Arc<dyn Transport>,
    layout: CacheLayout,
    active: ActiveManifest,
    package: String,
    version: String,
    location_to_lower: bool,
    records_per_step: usize,
    timeout: Duration,
    step: ManifestStep,
    fetch: Option<MemoryFetch>,
    attempts: u32,
    remote_hash: String,
    deserializer: Option<DeserializeManifestOperation>,
    from_cache: bool,
    status: OperationStatus,
    error: Option<String>,
    failure: Option<UpdateError>,
    last_code: Option<u16>,
}

impl UpdatePackageManifestOperation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        remote: Arc<RemoteServices>,
        transport: Arc<dyn Transport>,
        layout: CacheLayout,
        active: ActiveManifest,
        package: impl Into<String>,
        version: impl Into<String>,
        location_to_lower: bool,
        records_per_step: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            remote,
            transport,
            layout,
            active,
            package: package.into(),
            version: version.into(),
            location_to_lower,
            records_per_step,
            timeout,
            step: ManifestStep::None,
            fetch: None,
            attempts: 0,
            remote_hash: String::new(),
            deserializer: None,
            from_cache: false,
            status: OperationStatus::None,
            error: None,
            failure: None,
            last_code: None,
        }
    }

    pub fn package_version(&self) -> &str {
        &self.version
    }

    /// Whether the adopted manifest came from the local cache.
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn failure(&self) -> Option<&UpdateError> {
        self.failure.as_ref()
    }

    /// Status code of the last HTTP response.
    pub fn last_code(&self) -> Option<u16> {
        self.last_code
    }

    fn manifest_path(&self) -> PathBuf {
        self.layout.cached_manifest_file(&self.package, &self.version)
    }

    fn hash_path(&self) -> PathBuf {
        self.layout.cached_hash_file(&self.package, &self.version)
    }

    fn start_fetch(&mut self, file_name: &str, next: ManifestStep) {
        let url = self.remote.request_url(file_name);
        self.attempts += 1;
        debug!(package = %self.package, url = %url, "Requesting manifest file");
        match MemoryFetch::start(self.transport.clone(), url, self.timeout) {
            Ok(fetch) => {
                self.fetch = Some(fetch);
                self.step = next;
            }
            Err(e) => self.fail(e.into()),
        }
    }

    /// Poll the pending fetch; `None` while still running.
    fn poll_fetch(&mut self) -> Option<Result<Vec<u8>, UpdateError>> {
        let fetch = self.fetch.as_mut()?;
        let result = fetch.poll()?;
        self.last_code = fetch.http_code();
        self.fetch = None;
        Some(result.map_err(UpdateError::from))
    }

    /// Go back to `request` for another host, or fail once attempts run out.
    fn retry_or_fail(&mut self, error: UpdateError, request: ManifestStep) {
        if self.attempts < MAX_REQUEST_ATTEMPTS {
            warn!(
                package = %self.package,
                error = %error,
                "Manifest request failed, trying other host"
            );
            self.step = request;
        } else {
            self.fail(error);
        }
    }

    fn load_cached(&mut self) -> Option<Vec<u8>> {
        let path = self.manifest_path();
        if !path.exists() {
            return None;
        }
        match file_sha256(&path) {
            Ok(hash) if hash.eq_ignore_ascii_case(&self.remote_hash) => {
                fs::read(&path).ok()
            }
            Ok(hash) => {
                warn!(
                    path = %path.display(),
                    expected = %self.remote_hash,
                    actual = %hash,
                    "Cached manifest is stale, discarding"
                );
                let _ = fs::remove_file(&path);
                None
            }
            Err(_) => None,
        }
    }

    fn save_manifest(&self, data: &[u8]) -> Result<(), UpdateError> {
        write_file_atomic(&self.manifest_path(), data)?;
        write_file_atomic(&self.hash_path(), self.remote_hash.as_bytes())
    }

    fn begin_deserialize(&mut self, data: Vec<u8>) {
        self.deserializer = Some(DeserializeManifestOperation::new(data, self.records_per_step));
        self.step = ManifestStep::Deserialize;
    }

    fn adopt(&mut self, op: &mut DeserializeManifestOperation) -> Result<(), UpdateError> {
        let manifest = match op.take_manifest() {
            Some(m) => m,
            None => {
                return Err(match op.decode_error() {
                    Some(e) => UpdateError::Manifest(e.clone()),
                    None => UpdateError::NoManifest(self.package.clone()),
                })
            }
        };
        if manifest.package_version != self.version {
            return Err(UpdateError::VersionMismatch {
                expected: self.version.clone(),
                found: manifest.package_version,
            });
        }
        let manifest = prepare_manifest(manifest, &self.package, self.location_to_lower)?;
        write_version_file(&self.layout.cached_version_file(&self.package), &self.version)?;
        self.active.set(Arc::new(manifest));
        Ok(())
    }

    fn succeed(&mut self) {
        self.status = OperationStatus::Succeed;
        self.step = ManifestStep::Done;
    }

    fn fail(&mut self, error: UpdateError) {
        warn!(
            package = %self.package,
            version = %self.version,
            error = %error,
            "Manifest update failed"
        );
        self.error = Some(error.to_string());
        self.failure = Some(error);
        self.status = OperationStatus::Failed;
        self.step = ManifestStep::Done;
    }
}

impl AsyncOperation for UpdatePackageManifestOperation {
    fn update(&mut self) {
        match self.step {
            ManifestStep::None => {
                self.status = OperationStatus::Processing;
                self.step = ManifestStep::CheckActive;
            }
            ManifestStep::CheckActive => {
                if !is_valid_package_version(&self.version) {
                    self.fail(UpdateError::InvalidVersion(self.version.clone()));
                } else if self.active.version().as_deref() == Some(self.version.as_str()) {
                    debug!(
                        package = %self.package,
                        version = %self.version,
                        "Manifest already active"
                    );
                    self.succeed();
                } else {
                    self.step = ManifestStep::RequestHash;
                }
            }
            ManifestStep::RequestHash => {
                let name = manifest_hash_file_name(&self.package, &self.version);
                self.start_fetch(&name, ManifestStep::WaitHash);
            }
            ManifestStep::WaitHash => match self.poll_fetch() {
                None => {}
                Some(Ok(body)) => {
                    self.remote_hash = String::from_utf8_lossy(&body).trim().to_string();
                    self.attempts = 0;
                    self.step = ManifestStep::LoadCached;
                }
                Some(Err(e)) => self.retry_or_fail(e, ManifestStep::RequestHash),
            },
            ManifestStep::LoadCached => match self.load_cached() {
                Some(data) => {
                    debug!(
                        package = %self.package,
                        version = %self.version,
                        "Using cached manifest"
                    );
                    self.from_cache = true;
                    self.begin_deserialize(data);
                }
                None => self.step = ManifestStep::RequestManifest,
            },
            ManifestStep::RequestManifest => {
                let name = manifest_binary_file_name(&self.package, &self.version);
                self.start_fetch(&name, ManifestStep::WaitManifest);
            }
            ManifestStep::WaitManifest => match self.poll_fetch() {
                None => {}
                Some(Ok(body)) => {
                    let actual = bytes_sha256(&body);
                    if !actual.eq_ignore_ascii_case(&self.remote_hash) {
                        self.fail(UpdateError::HashMismatch {
                            expected: self.remote_hash.clone(),
                            actual,
                        });
                        return;
                    }
                    if let Err(e) = self.save_manifest(&body) {
                        self.fail(e);
                        return;
                    }
                    self.begin_deserialize(body);
                }
                Some(Err(e)) => self.retry_or_fail(e, ManifestStep::RequestManifest),
            },
            ManifestStep::Deserialize => {
                let Some(mut op) = self.deserializer.take() else {
                    return;
                };
                op.update();
                if !op.is_done() {
                    self.deserializer = Some(op);
                    return;
                }
                match self.adopt(&mut op) {
                    Ok(()) => {
                        info!(
                            package = %self.package,
                            version = %self.version,
                            from_cache = self.from_cache,
                            "Manifest updated"
                        );
                        self.succeed();
                    }
                    Err(e) => self.fail(e),
                }
            }
            ManifestStep::Done => {}
        }
    }

    fn status(&self) -> OperationStatus {
        self.status
    }

    fn progress(&self) -> f32 {
        match self.step {
            ManifestStep::None | ManifestStep::CheckActive => 0.0,
            ManifestStep::RequestHash | ManifestStep::WaitHash => 0.1,
            ManifestStep::LoadCached | ManifestStep::RequestManifest => 0.2,
            ManifestStep::WaitManifest => 0.3,
            ManifestStep::Deserialize => {
                0.4 + 0.6 * self.deserializer.as_ref().map_or(0.0, |d| d.progress())
            }
            ManifestStep::Done => 1.0,
        }
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::test_support::MemoryTransport;
    use crate::manifest::codec::serialize;
    use crate::manifest::test_support::sample_manifest;
    use crate::update::read_version_file;
    use tempfile::TempDir;

    const HASH_URL: &str = "http://main/PatchManifest_DefaultPackage_v1.hash";
    const BYTES_URL: &str = "http://backup/PatchManifest_DefaultPackage_v1.bytes";

    struct Fixture {
        _dir: TempDir,
        layout: CacheLayout,
        transport: Arc<MemoryTransport>,
        active: ActiveManifest,
        bytes: Vec<u8>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let layout = CacheLayout::new(dir.path());
            let bytes = serialize(&sample_manifest(false)).unwrap();
            Self {
                _dir: dir,
                layout,
                transport: Arc::new(MemoryTransport::new()),
                active: ActiveManifest::new(),
                bytes,
            }
        }

        fn op(&self, version: &str) -> UpdatePackageManifestOperation {
            UpdatePackageManifestOperation::new(
                Arc::new(RemoteServices::new("http://main", "http://backup")),
                self.transport.clone(),
                self.layout.clone(),
                self.active.clone(),
                "DefaultPackage",
                version,
                false,
                2,
                Duration::from_secs(5),
            )
        }
    }

    #[test]
    fn test_downloads_and_adopts_manifest() {
        let fx = Fixture::new();
        fx.transport.serve(HASH_URL, bytes_sha256(&fx.bytes).into_bytes());
        fx.transport.serve(BYTES_URL, fx.bytes.clone());

        let mut op = fx.op("v1");
        op.wait_for_async_complete();

        assert_eq!(op.status(), OperationStatus::Succeed, "{:?}", op.error());
        assert!(!op.from_cache());
        assert_eq!(fx.active.version().as_deref(), Some("v1"));
        assert!(fx.active.get().unwrap().is_mapping_initialized());
        assert!(fx.layout.cached_manifest_file("DefaultPackage", "v1").exists());
        assert_eq!(
            read_version_file(&fx.layout.cached_version_file("DefaultPackage")).unwrap(),
            "v1"
        );
    }

    #[test]
    fn test_hash_mismatch_keeps_previous_manifest() {
        let fx = Fixture::new();
        let mut previous = sample_manifest(false);
        previous.package_version = "v0".to_string();
        fx.active.set(Arc::new(previous));

        fx.transport.serve(HASH_URL, b"deadbeef".to_vec());
        fx.transport.serve(BYTES_URL, fx.bytes.clone());

        let mut op = fx.op("v1");
        op.wait_for_async_complete();

        assert_eq!(op.status(), OperationStatus::Failed);
        assert!(matches!(op.failure(), Some(UpdateError::HashMismatch { .. })));
        assert_eq!(fx.active.version().as_deref(), Some("v0"));
        assert!(!fx.layout.cached_manifest_file("DefaultPackage", "v1").exists());
    }

    #[test]
    fn test_reuses_cached_manifest() {
        let fx = Fixture::new();
        write_file_atomic(&fx.layout.cached_manifest_file("DefaultPackage", "v1"), &fx.bytes)
            .unwrap();
        fx.transport.serve(HASH_URL, bytes_sha256(&fx.bytes).into_bytes());

        let mut op = fx.op("v1");
        op.wait_for_async_complete();

        assert_eq!(op.status(), OperationStatus::Succeed);
        assert!(op.from_cache());
        // Only the hash file went over the wire
        assert_eq!(fx.transport.requested_urls(), vec![HASH_URL.to_string()]);
    }

    #[test]
    fn test_active_version_short_circuits() {
        let fx = Fixture::new();
        fx.active.set(Arc::new(sample_manifest(false)));

        let mut op = fx.op("v1");
        op.wait_for_async_complete();

        assert_eq!(op.status(), OperationStatus::Succeed);
        assert_eq!(fx.transport.request_count(), 0);
    }

    #[test]
    fn test_missing_hash_fails() {
        let fx = Fixture::new();
        let mut op = fx.op("v1");
        op.wait_for_async_complete();

        assert_eq!(op.status(), OperationStatus::Failed);
        assert_eq!(op.last_code(), Some(404));
        assert!(fx.active.get().is_none());
        assert_eq!(
            fx.transport.requested_urls(),
            vec![
                HASH_URL.to_string(),
                "http://backup/PatchManifest_DefaultPackage_v1.hash".to_string(),
            ]
        );
    }

    #[test]
    fn test_failed_fetches_retry_other_host() {
        let fx = Fixture::new();
        // hash: main fails, backup serves; bytes: main fails, backup serves
        fx.transport.fail_with(HASH_URL, 503);
        fx.transport.serve(
            "http://backup/PatchManifest_DefaultPackage_v1.hash",
            bytes_sha256(&fx.bytes).into_bytes(),
        );
        fx.transport.fail_with("http://main/PatchManifest_DefaultPackage_v1.bytes", 500);
        fx.transport.serve(BYTES_URL, fx.bytes.clone());

        let mut op = fx.op("v1");
        op.wait_for_async_complete();

        assert_eq!(op.status(), OperationStatus::Succeed, "{:?}", op.error());
        assert_eq!(fx.transport.request_count(), 4);
        assert_eq!(fx.active.version().as_deref(), Some("v1"));
    }

    #[test]
    fn test_path_like_version_touches_nothing() {
        let fx = Fixture::new();
        let mut op = fx.op("../../escape");
        op.wait_for_async_complete();

        assert!(matches!(op.failure(), Some(UpdateError::InvalidVersion(_))));
        assert_eq!(fx.transport.request_count(), 0);
        assert!(!fx.layout.cached_version_file("DefaultPackage").exists());
    }

    #[test]
    fn test_version_mismatch_is_not_adopted() {
        let fx = Fixture::new();
        // v1 content published under the v2 names
        fx.transport.serve(
            "http://main/PatchManifest_DefaultPackage_v2.hash",
            bytes_sha256(&fx.bytes).into_bytes(),
        );
        fx.transport.serve(
            "http://backup/PatchManifest_DefaultPackage_v2.bytes",
            fx.bytes.clone(),
        );

        let mut op = fx.op("v2");
        op.wait_for_async_complete();

        assert!(matches!(
            op.failure(),
            Some(UpdateError::VersionMismatch { found, .. }) if found == "v1"
        ));
        assert!(fx.active.get().is_none());
        assert!(!fx.layout.cached_version_file("DefaultPackage").exists());
    }

    #[test]
    fn test_version_file_write_failure_keeps_active_manifest() {
        let fx = Fixture::new();
        let mut previous = sample_manifest(false);
        previous.package_version = "v0".to_string();
        fx.active.set(Arc::new(previous));
        fx.transport.serve(HASH_URL, bytes_sha256(&fx.bytes).into_bytes());
        fx.transport.serve(BYTES_URL, fx.bytes.clone());
        // A directory where the version file goes makes the write fail
        fs::create_dir_all(fx.layout.cached_version_file("DefaultPackage")).unwrap();

        let mut op = fx.op("v1");
        op.wait_for_async_complete();

        assert_eq!(op.status(), OperationStatus::Failed);
        assert!(matches!(op.failure(), Some(UpdateError::Io { .. })));
        assert_eq!(fx.active.version().as_deref(), Some("v0"));
    }
}
