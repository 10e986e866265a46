use std::path::{Path, PathBuf};

use super::{BundleInfo, LoadSource, PlayMode, PlayModeKind};
use crate::bundle::PatchBundle;
use crate::manifest::{PatchManifest, ResolveError};

/// Reads assets straight from a source tree; nothing is cached or fetched.
#[derive(Debug, Clone)]
pub struct SimulatePlayMode {
    source_root: PathBuf,
}

impl SimulatePlayMode {
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }
}

impl PlayMode for SimulatePlayMode {
    fn kind(&self) -> PlayModeKind {
        PlayModeKind::Simulate
    }

    fn resolve_bundle(&self, bundle: &PatchBundle) -> BundleInfo {
        BundleInfo::new(bundle.clone(), LoadSource::Simulated)
    }

    fn bundle_info(
        &self,
        manifest: &PatchManifest,
        asset_path: &str,
    ) -> Result<BundleInfo, ResolveError> {
        let mut info = self.resolve_bundle(manifest.main_bundle(asset_path)?);
        info.simulated_path = Some(self.source_root.join(asset_path));
        Ok(info)
    }
}
