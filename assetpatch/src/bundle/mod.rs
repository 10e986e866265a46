//! Content identity model.
//!
//! A [`PatchBundle`] describes one content-addressed payload file: its file
//! hash doubles as the cache GUID, so two bundles with equal hashes share a
//! single cache entry regardless of their names. A [`PatchAsset`] maps one
//! logical asset onto its owning bundle and the bundles it depends on.
//!
//! Both are created by decoding (or building) a manifest and are immutable
//! afterwards, apart from the one-time [`PatchBundle::parse_bundle`] call that
//! fills in package-scoped derived fields.

mod naming;

pub use naming::{
    is_valid_file_hash, is_valid_package_version, manifest_binary_file_name,
    manifest_hash_file_name, remote_file_name, version_file_name, OutputNameStyle,
};

use std::fmt;

use serde::Serialize;

use crate::manifest::{ManifestError, ManifestResult};

/// How the runtime is expected to load a bundle's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum BundleLoadMethod {
    #[default]
    Normal,
    LoadFromFileOffset,
    LoadFromMemory,
    LoadFromStream,
}

impl BundleLoadMethod {
    /// Wire value stored in the manifest.
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::LoadFromFileOffset => 1,
            Self::LoadFromMemory => 2,
            Self::LoadFromStream => 3,
        }
    }
}

impl TryFrom<u8> for BundleLoadMethod {
    type Error = ManifestError;

    fn try_from(value: u8) -> ManifestResult<Self> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::LoadFromFileOffset),
            2 => Ok(Self::LoadFromMemory),
            3 => Ok(Self::LoadFromStream),
            other => Err(ManifestError::UnknownLoadMethod(other)),
        }
    }
}

/// A content-addressed bundle descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchBundle {
    /// Logical bundle name.
    pub bundle_name: String,
    /// Content hash; also the cache GUID.
    pub file_hash: String,
    /// CRC-32 of the payload as 8-digit hex.
    pub file_crc: String,
    /// Payload size in bytes.
    pub file_size: u64,
    /// Raw files are cached under a separate root.
    pub is_raw_file: bool,
    pub load_method: BundleLoadMethod,
    pub tags: Vec<String>,
    /// Indices of the bundles/assets referencing this bundle.
    pub reference_ids: Vec<i32>,

    #[serde(skip)]
    package_name: String,
    #[serde(skip)]
    file_name: String,
}

impl PatchBundle {
    /// Create a bundle descriptor.
    pub fn new(
        bundle_name: impl Into<String>,
        file_hash: impl Into<String>,
        file_crc: impl Into<String>,
        file_size: u64,
    ) -> Self {
        Self {
            bundle_name: bundle_name.into(),
            file_hash: file_hash.into(),
            file_crc: file_crc.into(),
            file_size,
            is_raw_file: false,
            load_method: BundleLoadMethod::Normal,
            tags: Vec::new(),
            reference_ids: Vec::new(),
            package_name: String::new(),
            file_name: String::new(),
        }
    }

    /// Set the bundle tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the bundle as a raw (non-bundle) file.
    pub fn with_raw_file(mut self, is_raw_file: bool) -> Self {
        self.is_raw_file = is_raw_file;
        self
    }

    pub fn with_load_method(mut self, load_method: BundleLoadMethod) -> Self {
        self.load_method = load_method;
        self
    }

    pub fn with_reference_ids(mut self, reference_ids: Vec<i32>) -> Self {
        self.reference_ids = reference_ids;
        self
    }

    /// Compute the package-scoped derived fields.
    ///
    /// Called once when the owning manifest is built.
    pub fn parse_bundle(&mut self, package_name: &str, name_style: OutputNameStyle) {
        self.package_name = package_name.to_string();
        self.file_name = remote_file_name(&self.bundle_name, &self.file_hash, name_style);
    }

    /// Cache key; equal hashes mean equal content.
    pub fn cache_guid(&self) -> &str {
        &self.file_hash
    }

    /// Package this bundle belongs to (empty before `parse_bundle`).
    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    /// Remote and built-in payload file name (empty before `parse_bundle`).
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Whether the bundle carries at least one of `tags`.
    pub fn has_tag(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }

    pub fn has_any_tags(&self) -> bool {
        !self.tags.is_empty()
    }

    /// Content equality: same hash, CRC and size.
    pub fn same_content(&self, other: &PatchBundle) -> bool {
        self.file_hash == other.file_hash
            && self.file_crc == other.file_crc
            && self.file_size == other.file_size
    }
}

impl fmt::Display for PatchBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.bundle_name, self.file_hash)
    }
}

/// Maps one logical asset to its owning bundle and dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchAsset {
    /// Addressable key (may be empty).
    pub address: String,
    /// Canonical asset path, unique within a manifest.
    pub asset_path: String,
    pub asset_tags: Vec<String>,
    /// Index of the owning bundle.
    pub bundle_id: usize,
    /// Indices of dependency bundles.
    pub depend_ids: Vec<usize>,
}

impl PatchAsset {
    /// Create an asset record.
    pub fn new(
        address: impl Into<String>,
        asset_path: impl Into<String>,
        bundle_id: usize,
        depend_ids: Vec<usize>,
    ) -> Self {
        Self {
            address: address.into(),
            asset_path: asset_path.into(),
            asset_tags: Vec::new(),
            bundle_id,
            depend_ids,
        }
    }

    /// Set the asset tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.asset_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the asset carries at least one of `tags`.
    pub fn has_tag(&self, tags: &[String]) -> bool {
        self.asset_tags.iter().any(|t| tags.contains(t))
    }
}
