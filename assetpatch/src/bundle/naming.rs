//! File naming for bundle payloads and manifest files.

use std::fmt;

use serde::Serialize;

use crate::manifest::{ManifestError, ManifestResult};

/// How bundle payload files are named on the remote server and in the
/// built-in payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum OutputNameStyle {
    /// `{hash}{ext}`
    #[default]
    HashName,
    /// `{bundle_stem}_{hash}{ext}`
    BundleNameHashName,
}

impl OutputNameStyle {
    /// Wire value stored in the manifest header.
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::HashName => 1,
            Self::BundleNameHashName => 4,
        }
    }
}

impl TryFrom<i32> for OutputNameStyle {
    type Error = ManifestError;

    fn try_from(value: i32) -> ManifestResult<Self> {
        match value {
            1 => Ok(Self::HashName),
            4 => Ok(Self::BundleNameHashName),
            other => Err(ManifestError::UnknownNameStyle(other)),
        }
    }
}

impl fmt::Display for OutputNameStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HashName => write!(f, "hash"),
            Self::BundleNameHashName => write!(f, "name+hash"),
        }
    }
}

/// Payload file name of a bundle.
///
/// # Example
///
/// ```
/// use assetpatch::bundle::{remote_file_name, OutputNameStyle};
///
/// assert_eq!(
///     remote_file_name("ui_main.bundle", "abc123", OutputNameStyle::HashName),
///     "abc123.bundle"
/// );
/// assert_eq!(
///     remote_file_name("ui_main.bundle", "abc123", OutputNameStyle::BundleNameHashName),
///     "ui_main_abc123.bundle"
/// );
/// ```
pub fn remote_file_name(bundle_name: &str, file_hash: &str, style: OutputNameStyle) -> String {
    let (stem, ext) = split_extension(bundle_name);
    match style {
        OutputNameStyle::HashName => format!("{}{}", file_hash, ext),
        OutputNameStyle::BundleNameHashName => format!("{}_{}{}", stem, file_hash, ext),
    }
}

/// Split `name` before the last `.` of its final `/` segment.
///
/// A leading dot does not start an extension (`.bundle` has none).
fn split_extension(name: &str) -> (&str, &str) {
    let segment_start = name.rfind('/').map_or(0, |i| i + 1);
    match name[segment_start..].rfind('.') {
        Some(dot) if dot > 0 => name.split_at(segment_start + dot),
        _ => (name, ""),
    }
}

/// Whether `hash` can name a cache entry directory.
///
/// File hashes become path components, so only ASCII letters, digits, `-`
/// and `_` are accepted.
pub fn is_valid_file_hash(hash: &str) -> bool {
    !hash.is_empty()
        && hash
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Whether `version` can be embedded in manifest file names.
pub fn is_valid_package_version(version: &str) -> bool {
    !version.is_empty()
        && !version.starts_with('.')
        && version
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'+'))
}

/// Remote/cached file holding the current version string of a package.
pub fn version_file_name(package_name: &str) -> String {
    format!("PatchManifest_{}.version", package_name)
}

/// Binary manifest file of a package version.
pub fn manifest_binary_file_name(package_name: &str, package_version: &str) -> String {
    format!("PatchManifest_{}_{}.bytes", package_name, package_version)
}

/// Hash side-channel file of a package version's manifest.
pub fn manifest_hash_file_name(package_name: &str, package_version: &str) -> String {
    format!("PatchManifest_{}_{}.hash", package_name, package_version)
}
