//! Error types for manifest decoding and resolution.

use thiserror::Error;

/// Result type for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;

/// Errors raised while encoding, decoding or indexing a manifest.
///
/// All of these are fatal: a manifest that fails here is never adopted and
/// there is no migration path between format versions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    /// The leading signature does not identify a manifest file.
    #[error("invalid manifest format: signature {found:#010x}, expected {expected:#010x}")]
    InvalidSignature { expected: u32, found: u32 },

    /// The file format version differs from the one this build understands.
    #[error("incompatible manifest version {found}, expected {expected}")]
    IncompatibleVersion { expected: String, found: String },

    /// Two assets share the same path.
    #[error("duplicate asset path: {0}")]
    DuplicateAssetPath(String),

    /// Two bundles share the same name.
    #[error("duplicate bundle name: {0}")]
    DuplicateBundleName(String),

    /// Two addressable assets share the same address.
    #[error("duplicate address: {0}")]
    DuplicateAddress(String),

    /// An asset refers to a bundle index outside the bundle list.
    #[error("invalid bundle id {id} for asset {asset_path} (bundle count {count})")]
    InvalidBundleId {
        asset_path: String,
        id: i64,
        count: usize,
    },

    /// A record count or size field is negative.
    #[error("invalid {field}: {value}")]
    InvalidValue { field: &'static str, value: i64 },

    /// The buffer ended in the middle of a record.
    #[error("unexpected end of data at offset {offset} (needed {needed} bytes)")]
    UnexpectedEof { offset: usize, needed: usize },

    /// A string field is not valid UTF-8.
    #[error("invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    /// Unknown bundle load method byte.
    #[error("unknown bundle load method {0}")]
    UnknownLoadMethod(u8),

    /// Unknown output name style value.
    #[error("unknown output name style {0}")]
    UnknownNameStyle(i32),

    /// A bundle file hash is not usable as a cache directory name.
    #[error("invalid file hash {hash:?} for bundle {bundle}")]
    InvalidFileHash { bundle: String, hash: String },

    /// The package version is not usable in manifest file names.
    #[error("invalid package version {0:?}")]
    InvalidPackageVersion(String),

    /// A string or array is too long for its length prefix.
    #[error("{what} too large to encode ({len})")]
    TooLarge { what: &'static str, len: usize },
}

/// Errors raised while resolving a location against the active manifest.
///
/// A missing asset indicates a caller asking for something the manifest was
/// never built with; these are not retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// No manifest has been adopted yet.
    #[error("no active manifest")]
    NoActiveManifest,

    /// The location string is empty.
    #[error("location is empty")]
    EmptyLocation,

    /// The location mapping was never initialized.
    #[error("asset path mapping is not initialized")]
    MappingNotInitialized,

    /// No asset is mapped to the location.
    #[error("location not found: {0}")]
    LocationNotFound(String),

    /// The asset path is not part of the manifest.
    #[error("asset not found in manifest: {0}")]
    AssetNotFound(String),
}
