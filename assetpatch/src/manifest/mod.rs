//! Versioned resolution table mapping locations to bundles.
//!
//! A [`PatchManifest`] is built once per package version (by decoding a
//! binary manifest or via [`PatchManifest::from_parts`]) and is immutable
//! afterwards. A package adopts a manifest wholesale; a newer version simply
//! replaces the old one.
//!
//! # Lookup maps
//!
//! - asset path → asset (duplicate paths are fatal)
//! - bundle name → bundle (duplicate names are fatal)
//! - location → asset path, initialized once by
//!   [`PatchManifest::init_asset_path_mapping`]

pub mod buffer;
pub mod codec;
mod error;

pub use codec::{
    deserialize, serialize, DeserializeManifestOperation, ManifestDecoder,
    DEFAULT_RECORDS_PER_STEP, MANIFEST_FILE_SIGN, MANIFEST_FILE_VERSION,
};
pub use error::{ManifestError, ManifestResult, ResolveError};

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::warn;

use crate::bundle::{
    is_valid_file_hash, is_valid_package_version, OutputNameStyle, PatchAsset, PatchBundle,
};

/// Version-scoped mapping from logical locations to bundles.
#[derive(Debug, Clone, Serialize)]
pub struct PatchManifest {
    /// Format version; always [`MANIFEST_FILE_VERSION`] once decoded.
    pub file_version: String,
    /// Whether assets are located by address rather than path.
    pub enable_addressable: bool,
    pub output_name_style: OutputNameStyle,
    pub package_name: String,
    pub package_version: String,
    pub asset_list: Vec<PatchAsset>,
    pub bundle_list: Vec<PatchBundle>,

    #[serde(skip)]
    asset_dic: HashMap<String, usize>,
    #[serde(skip)]
    bundle_dic: HashMap<String, usize>,
    #[serde(skip)]
    cache_guids: HashSet<String>,
    #[serde(skip)]
    asset_path_mapping: Option<HashMap<String, String>>,
    #[serde(skip)]
    location_to_lower: bool,
}

impl PatchManifest {
    /// Build a manifest from its records, validating every invariant.
    ///
    /// Parses each bundle's derived fields and builds the asset and bundle
    /// lookup maps. Bundle ids of every asset are checked against the bundle
    /// list here so later resolution cannot index out of range.
    pub fn from_parts(
        enable_addressable: bool,
        output_name_style: OutputNameStyle,
        package_name: impl Into<String>,
        package_version: impl Into<String>,
        asset_list: Vec<PatchAsset>,
        mut bundle_list: Vec<PatchBundle>,
    ) -> ManifestResult<Self> {
        let package_name = package_name.into();
        let package_version = package_version.into();
        if !is_valid_package_version(&package_version) {
            return Err(ManifestError::InvalidPackageVersion(package_version));
        }
        let bundle_count = bundle_list.len();

        let mut bundle_dic = HashMap::with_capacity(bundle_count);
        let mut cache_guids = HashSet::with_capacity(bundle_count);
        for (index, bundle) in bundle_list.iter_mut().enumerate() {
            check_file_hash(bundle)?;
            bundle.parse_bundle(&package_name, output_name_style);
            if bundle_dic.insert(bundle.bundle_name.clone(), index).is_some() {
                return Err(ManifestError::DuplicateBundleName(bundle.bundle_name.clone()));
            }
            cache_guids.insert(bundle.cache_guid().to_string());
        }

        let mut asset_dic = HashMap::with_capacity(asset_list.len());
        for (index, asset) in asset_list.iter().enumerate() {
            for id in std::iter::once(asset.bundle_id).chain(asset.depend_ids.iter().copied()) {
                if id >= bundle_count {
                    return Err(ManifestError::InvalidBundleId {
                        asset_path: asset.asset_path.clone(),
                        id: id as i64,
                        count: bundle_count,
                    });
                }
            }
            if asset_dic.insert(asset.asset_path.clone(), index).is_some() {
                return Err(ManifestError::DuplicateAssetPath(asset.asset_path.clone()));
            }
        }

        Ok(Self {
            file_version: MANIFEST_FILE_VERSION.to_string(),
            enable_addressable,
            output_name_style,
            package_name,
            package_version,
            asset_list,
            bundle_list,
            asset_dic,
            bundle_dic,
            cache_guids,
            asset_path_mapping: None,
            location_to_lower: false,
        })
    }

    /// Build the location → asset path mapping.
    ///
    /// Only the first call has any effect; later calls return `Ok(())`
    /// without touching the existing mapping.
    pub fn init_asset_path_mapping(&mut self, location_to_lower: bool) -> ManifestResult<()> {
        if self.asset_path_mapping.is_some() {
            return Ok(());
        }

        let mut mapping = HashMap::with_capacity(self.asset_list.len() * 2);

        if self.enable_addressable {
            for asset in &self.asset_list {
                if asset.address.is_empty() {
                    continue;
                }
                if mapping
                    .insert(asset.address.clone(), asset.asset_path.clone())
                    .is_some()
                {
                    return Err(ManifestError::DuplicateAddress(asset.address.clone()));
                }
            }
        } else {
            for asset in &self.asset_list {
                let location = if location_to_lower {
                    asset.asset_path.to_lowercase()
                } else {
                    asset.asset_path.clone()
                };

                if mapping
                    .insert(location.clone(), asset.asset_path.clone())
                    .is_some()
                {
                    return Err(ManifestError::DuplicateAssetPath(asset.asset_path.clone()));
                }

                // Also allow lookups without the file extension
                let without_ext = remove_extension(&location);
                if without_ext != location {
                    if mapping.contains_key(without_ext) {
                        warn!(
                            location = %without_ext,
                            asset_path = %asset.asset_path,
                            "Extensionless location already mapped, keeping first"
                        );
                    } else {
                        mapping.insert(without_ext.to_string(), asset.asset_path.clone());
                    }
                }
            }
        }

        self.location_to_lower = location_to_lower;
        self.asset_path_mapping = Some(mapping);
        Ok(())
    }

    /// Whether the location mapping has been built.
    pub fn is_mapping_initialized(&self) -> bool {
        self.asset_path_mapping.is_some()
    }

    /// Resolve a location to its canonical asset path.
    pub fn map_to_asset_path(&self, location: &str) -> Result<String, ResolveError> {
        if location.is_empty() {
            return Err(ResolveError::EmptyLocation);
        }
        let mapping = self
            .asset_path_mapping
            .as_ref()
            .ok_or(ResolveError::MappingNotInitialized)?;

        let key = if self.location_to_lower && !self.enable_addressable {
            location.to_lowercase()
        } else {
            location.to_string()
        };

        mapping
            .get(&key)
            .cloned()
            .ok_or_else(|| ResolveError::LocationNotFound(location.to_string()))
    }

    pub fn try_get_asset(&self, asset_path: &str) -> Option<&PatchAsset> {
        self.asset_dic.get(asset_path).map(|&i| &self.asset_list[i])
    }

    pub fn try_get_bundle(&self, bundle_name: &str) -> Option<&PatchBundle> {
        self.bundle_dic.get(bundle_name).map(|&i| &self.bundle_list[i])
    }

    /// Whether any bundle of this manifest is stored under `cache_guid`.
    pub fn is_include_bundle_file(&self, cache_guid: &str) -> bool {
        self.cache_guids.contains(cache_guid)
    }

    /// The bundle that owns an asset.
    pub fn main_bundle(&self, asset_path: &str) -> Result<&PatchBundle, ResolveError> {
        let asset = self
            .try_get_asset(asset_path)
            .ok_or_else(|| ResolveError::AssetNotFound(asset_path.to_string()))?;
        Ok(&self.bundle_list[asset.bundle_id])
    }

    /// Dependency bundles of an asset, deduplicated, excluding its own bundle.
    pub fn all_dependencies(&self, asset_path: &str) -> Result<Vec<&PatchBundle>, ResolveError> {
        let asset = self
            .try_get_asset(asset_path)
            .ok_or_else(|| ResolveError::AssetNotFound(asset_path.to_string()))?;

        let mut seen = HashSet::new();
        Ok(asset
            .depend_ids
            .iter()
            .filter(|&&id| id != asset.bundle_id && seen.insert(id))
            .map(|&id| &self.bundle_list[id])
            .collect())
    }

    /// Assets carrying at least one of `tags`.
    pub fn assets_by_tags(&self, tags: &[String]) -> Vec<&PatchAsset> {
        self.asset_list.iter().filter(|a| a.has_tag(tags)).collect()
    }

    /// Total payload size of all bundles.
    pub fn total_bundle_size(&self) -> u64 {
        self.bundle_list.iter().map(|b| b.file_size).sum()
    }
}

/// Reject hashes that would not stay a single directory under the cache root.
pub(crate) fn check_file_hash(bundle: &PatchBundle) -> ManifestResult<()> {
    if is_valid_file_hash(&bundle.file_hash) {
        Ok(())
    } else {
        Err(ManifestError::InvalidFileHash {
            bundle: bundle.bundle_name.clone(),
            hash: bundle.file_hash.clone(),
        })
    }
}

/// Strip the final extension from a path-like location.
fn remove_extension(location: &str) -> &str {
    match location.rfind('.') {
        Some(dot) if !location[dot..].contains('/') => &location[..dot],
        _ => location,
    }
}
