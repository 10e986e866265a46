use std::fs;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::error::UpdateError;
use super::version_file::read_version_file;
use super::{prepare_manifest, ActiveManifest};
use crate::bundle::is_valid_package_version;
use crate::cache::{
    BuiltinLayout, CacheSystem, FindCacheFilesOperation, VerifyCacheFilesOperation,
    VerifyExecutor, VerifyLevel,
};
use crate::checksum::file_sha256;
use crate::manifest::{DeserializeManifestOperation, PatchManifest};
use crate::operation::{AsyncOperation, OperationStatus};
use crate::playmode::{BuiltinPayload, BuiltinSlot, PlayModeKind};

/// Everything the start-up sequence needs from its package.
#[derive(Debug, Clone)]
pub struct InitializeParameters {
    pub package: String,
    pub play_mode: PlayModeKind,
    pub cache: Arc<CacheSystem>,
    pub builtin_layout: Option<BuiltinLayout>,
    pub builtin_slot: BuiltinSlot,
    pub active: ActiveManifest,
    pub executor: VerifyExecutor,
    pub verify_level: VerifyLevel,
    pub location_to_lower: bool,
    pub records_per_step: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitStep {
    None,
    LoadBuiltin,
    DecodeBuiltin,
    FindCache,
    VerifyCache,
    LoadCached,
    DecodeCached,
    Adopt,
    Done,
}

/// Bring a package up from what is already on disk.
///
/// Loads the built-in manifest when a built-in root is configured, scans and
/// verifies the cache, then adopts the cached manifest of the cached version.
/// Host mode falls back to the built-in manifest and tolerates having none at
/// all; offline and simulate modes require the built-in manifest.
#[derive(Debug)]
pub struct InitializeOperation {
    params: InitializeParameters,
    step: InitStep,
    decoder: Option<DeserializeManifestOperation>,
    builtin_manifest: Option<Arc<PatchManifest>>,
    cached_manifest: Option<PatchManifest>,
    find: Option<FindCacheFilesOperation>,
    verify: Option<VerifyCacheFilesOperation>,
    verified_count: usize,
    removed_count: usize,
    status: OperationStatus,
    error: Option<String>,
}

impl InitializeOperation {
    pub fn new(params: InitializeParameters) -> Self {
        Self {
            params,
            step: InitStep::None,
            decoder: None,
            builtin_manifest: None,
            cached_manifest: None,
            find: None,
            verify: None,
            verified_count: 0,
            removed_count: 0,
            status: OperationStatus::None,
            error: None,
        }
    }

    /// Cache entries recorded by the start-up verification.
    pub fn verified_count(&self) -> usize {
        self.verified_count
    }

    /// Cache entries deleted by the start-up verification.
    pub fn removed_count(&self) -> usize {
        self.removed_count
    }

    fn package(&self) -> &str {
        &self.params.package
    }

    fn needs_builtin(&self) -> bool {
        self.params.play_mode != PlayModeKind::Host
    }

    fn fail(&mut self, error: UpdateError) {
        warn!(package = %self.params.package, error = %error, "Initialization failed");
        self.error = Some(error.to_string());
        self.status = OperationStatus::Failed;
        self.step = InitStep::Done;
    }

    fn start_builtin(&mut self) {
        let Some(layout) = self.params.builtin_layout.clone() else {
            if self.needs_builtin() {
                self.fail(UpdateError::NoManifest(self.params.package.clone()));
            } else {
                self.step = InitStep::FindCache;
            }
            return;
        };

        let loaded = read_version_file(&layout.version_file(self.package()))
            .and_then(checked_version)
            .and_then(|version| {
                let path = layout.manifest_file(self.package(), &version);
                fs::read(&path).map_err(|e| UpdateError::io(path, e))
            });
        match loaded {
            Ok(data) => {
                self.decoder = Some(DeserializeManifestOperation::new(
                    data,
                    self.params.records_per_step,
                ));
                self.step = InitStep::DecodeBuiltin;
            }
            Err(e) if self.needs_builtin() => self.fail(e),
            Err(e) => {
                debug!(package = %self.package(), error = %e, "No built-in manifest");
                self.step = InitStep::FindCache;
            }
        }
    }

    /// Drive the pending decoder; `None` while it is still running.
    fn poll_decoder(&mut self) -> Option<Result<PatchManifest, UpdateError>> {
        let decoder = self.decoder.as_mut()?;
        decoder.update();
        if !decoder.is_done() {
            return None;
        }
        let mut decoder = self.decoder.take()?;
        let result = match decoder.take_manifest() {
            Some(manifest) => {
                prepare_manifest(manifest, &self.params.package, self.params.location_to_lower)
            }
            None => Err(match decoder.decode_error() {
                Some(e) => UpdateError::Manifest(e.clone()),
                None => UpdateError::NoManifest(self.params.package.clone()),
            }),
        };
        Some(result)
    }

    fn finish_builtin(&mut self, manifest: PatchManifest) {
        if let Some(layout) = self.params.builtin_layout.clone() {
            self.params
                .builtin_slot
                .set(BuiltinPayload::from_manifest(layout, &manifest));
        }
        debug!(
            package = %self.package(),
            version = %manifest.package_version,
            "Built-in manifest loaded"
        );
        self.builtin_manifest = Some(Arc::new(manifest));
        self.step = if self.params.play_mode == PlayModeKind::Simulate {
            InitStep::Adopt
        } else {
            InitStep::FindCache
        };
    }

    /// Read the cached manifest of the cached version, if it is intact.
    fn read_cached(&self) -> Option<Vec<u8>> {
        let layout = self.params.cache.layout();
        let version = read_version_file(&layout.cached_version_file(self.package())).ok()?;
        if !is_valid_package_version(&version) {
            warn!(package = %self.package(), version = %version, "Ignoring bad cached version");
            return None;
        }
        let manifest_path = layout.cached_manifest_file(self.package(), &version);
        let data = fs::read(&manifest_path).ok()?;

        let hash_path = layout.cached_hash_file(self.package(), &version);
        if let Ok(expected) = read_version_file(&hash_path) {
            match file_sha256(&manifest_path) {
                Ok(actual) if actual.eq_ignore_ascii_case(&expected) => {}
                _ => {
                    warn!(
                        package = %self.package(),
                        version = %version,
                        "Cached manifest does not match its hash"
                    );
                    return None;
                }
            }
        }
        Some(data)
    }

    fn adopt(&mut self) {
        if let Some(manifest) = self.cached_manifest.take() {
            self.params.active.set(Arc::new(manifest));
        } else if let Some(manifest) = self.builtin_manifest.clone() {
            self.params.active.set(manifest);
        } else if self.needs_builtin() {
            self.fail(UpdateError::NoManifest(self.params.package.clone()));
            return;
        } else {
            info!(package = %self.package(), "No local manifest, remote update required");
        }
        self.status = OperationStatus::Succeed;
        self.step = InitStep::Done;
    }
}

impl AsyncOperation for InitializeOperation {
    fn update(&mut self) {
        match self.step {
            InitStep::None => {
                self.status = OperationStatus::Processing;
                self.step = InitStep::LoadBuiltin;
            }
            InitStep::LoadBuiltin => self.start_builtin(),
            InitStep::DecodeBuiltin => match self.poll_decoder() {
                None => {}
                Some(Ok(manifest)) => self.finish_builtin(manifest),
                Some(Err(e)) if self.needs_builtin() => self.fail(e),
                Some(Err(e)) => {
                    warn!(
                        package = %self.package(),
                        error = %e,
                        "Ignoring broken built-in manifest"
                    );
                    self.step = InitStep::FindCache;
                }
            },
            InitStep::FindCache => {
                let find = self.find.get_or_insert_with(|| {
                    FindCacheFilesOperation::new(
                        self.params.cache.clone(),
                        self.params.package.clone(),
                    )
                });
                find.update();
                if find.is_done() {
                    let elements = find.take_elements();
                    self.find = None;
                    self.verify = Some(VerifyCacheFilesOperation::new(
                        self.params.cache.clone(),
                        self.params.executor.clone(),
                        self.params.verify_level,
                        elements,
                    ));
                    self.step = InitStep::VerifyCache;
                }
            }
            InitStep::VerifyCache => {
                let Some(verify) = self.verify.as_mut() else {
                    self.step = InitStep::LoadCached;
                    return;
                };
                verify.update();
                if verify.is_done() {
                    self.verified_count = verify.succeed_count();
                    self.removed_count = verify.failed_count();
                    self.verify = None;
                    self.step = if self.params.play_mode == PlayModeKind::Host {
                        InitStep::LoadCached
                    } else {
                        InitStep::Adopt
                    };
                }
            }
            InitStep::LoadCached => match self.read_cached() {
                Some(data) => {
                    self.decoder = Some(DeserializeManifestOperation::new(
                        data,
                        self.params.records_per_step,
                    ));
                    self.step = InitStep::DecodeCached;
                }
                None => self.step = InitStep::Adopt,
            },
            InitStep::DecodeCached => match self.poll_decoder() {
                None => {}
                Some(Ok(manifest)) => {
                    self.cached_manifest = Some(manifest);
                    self.step = InitStep::Adopt;
                }
                Some(Err(e)) => {
                    warn!(package = %self.package(), error = %e, "Ignoring broken cached manifest");
                    self.step = InitStep::Adopt;
                }
            },
            InitStep::Adopt => {
                self.adopt();
                if self.status == OperationStatus::Succeed {
                    info!(
                        package = %self.package(),
                        mode = %self.params.play_mode,
                        verified = self.verified_count,
                        removed = self.removed_count,
                        "Package initialized"
                    );
                }
            }
            InitStep::Done => {}
        }
    }

    fn status(&self) -> OperationStatus {
        self.status
    }

    fn progress(&self) -> f32 {
        match self.step {
            InitStep::None | InitStep::LoadBuiltin => 0.0,
            InitStep::DecodeBuiltin => 0.1,
            InitStep::FindCache => 0.2,
            InitStep::VerifyCache => {
                0.3 + 0.5 * self.verify.as_ref().map_or(0.0, |v| v.progress())
            }
            InitStep::LoadCached | InitStep::DecodeCached => 0.8,
            InitStep::Adopt => 0.9,
            InitStep::Done => 1.0,
        }
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Reject version strings that cannot name a manifest file.
fn checked_version(version: String) -> Result<String, UpdateError> {
    if is_valid_package_version(&version) {
        Ok(version)
    } else {
        Err(UpdateError::InvalidVersion(version))
    }
}
