//! Binary manifest codec.
//!
//! # Format
//!
//! ```text
//! u32      signature (MANIFEST_FILE_SIGN)
//! utf8     file version (MANIFEST_FILE_VERSION)
//! bool     enable addressable
//! i32      output name style
//! utf8     package name
//! utf8     package version
//! i32      asset count
//! asset    { utf8 address, utf8 asset path, utf8[] tags, i32 bundle id, i32[] depend ids }
//! i32      bundle count
//! bundle   { utf8 name, utf8 hash, utf8 crc, i64 size, bool raw, u8 load method,
//!            utf8[] tags, i32[] reference ids }
//! ```
//!
//! Decoding can run in one call ([`deserialize`]) or incrementally through
//! [`ManifestDecoder`], which decodes a bounded number of records per
//! `update()` so very large manifests do not stall the driving loop.

use std::mem;

use tracing::{debug, warn};

use super::buffer::{BufferReader, BufferWriter};
use super::error::{ManifestError, ManifestResult};
use super::{check_file_hash, PatchManifest};
use crate::bundle::{BundleLoadMethod, OutputNameStyle, PatchAsset, PatchBundle};
use crate::operation::{AsyncOperation, OperationStatus};

/// Signature at the start of every manifest file.
pub const MANIFEST_FILE_SIGN: u32 = 0x4150_4D46;

/// Manifest format version understood by this build.
pub const MANIFEST_FILE_VERSION: &str = "1.0.0";

/// Default number of records decoded per `update()`.
pub const DEFAULT_RECORDS_PER_STEP: usize = 500;

/// Serialize a manifest to its binary form.
pub fn serialize(manifest: &PatchManifest) -> ManifestResult<Vec<u8>> {
    let mut writer = BufferWriter::with_capacity(1024 + manifest.bundle_list.len() * 128);

    writer.write_u32(MANIFEST_FILE_SIGN);
    writer.write_utf8(&manifest.file_version)?;
    writer.write_bool(manifest.enable_addressable);
    writer.write_i32(manifest.output_name_style.as_i32());
    writer.write_utf8(&manifest.package_name)?;
    writer.write_utf8(&manifest.package_version)?;

    writer.write_i32(count_to_i32("asset count", manifest.asset_list.len())?);
    for asset in &manifest.asset_list {
        writer.write_utf8(&asset.address)?;
        writer.write_utf8(&asset.asset_path)?;
        writer.write_utf8_array(&asset.asset_tags)?;
        writer.write_i32(count_to_i32("bundle id", asset.bundle_id)?);
        let depend_ids = asset
            .depend_ids
            .iter()
            .map(|&id| count_to_i32("depend id", id))
            .collect::<ManifestResult<Vec<_>>>()?;
        writer.write_i32_array(&depend_ids)?;
    }

    writer.write_i32(count_to_i32("bundle count", manifest.bundle_list.len())?);
    for bundle in &manifest.bundle_list {
        writer.write_utf8(&bundle.bundle_name)?;
        writer.write_utf8(&bundle.file_hash)?;
        writer.write_utf8(&bundle.file_crc)?;
        let size = i64::try_from(bundle.file_size).map_err(|_| ManifestError::TooLarge {
            what: "file size",
            len: usize::MAX,
        })?;
        writer.write_i64(size);
        writer.write_bool(bundle.is_raw_file);
        writer.write_u8(bundle.load_method.as_u8());
        writer.write_utf8_array(&bundle.tags)?;
        writer.write_i32_array(&bundle.reference_ids)?;
    }

    Ok(writer.into_bytes())
}

/// Deserialize a manifest in one blocking call.
pub fn deserialize(data: &[u8]) -> ManifestResult<PatchManifest> {
    let mut decoder = ManifestDecoder::new(data.to_vec(), usize::MAX);
    while !decoder.is_done() {
        decoder.update();
    }
    decoder.finish()
}

fn count_to_i32(what: &'static str, value: usize) -> ManifestResult<i32> {
    i32::try_from(value).map_err(|_| ManifestError::TooLarge { what, len: value })
}

fn read_count(reader: &mut BufferReader, field: &'static str) -> ManifestResult<usize> {
    let value = reader.read_i32()?;
    usize::try_from(value).map_err(|_| ManifestError::InvalidValue {
        field,
        value: value as i64,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeStep {
    Header,
    Assets,
    BundleCount,
    Bundles,
    Finalize,
    Done,
}

#[derive(Debug, Default)]
struct Header {
    enable_addressable: bool,
    output_name_style: OutputNameStyle,
    package_name: String,
    package_version: String,
}

/// Incremental manifest decoder.
///
/// Each [`update`](ManifestDecoder::update) decodes at most
/// `records_per_step` asset or bundle records. Progress is
/// `decoded / total` once both counts are known.
#[derive(Debug)]
pub struct ManifestDecoder {
    reader: BufferReader,
    records_per_step: usize,
    step: DecodeStep,
    header: Header,
    asset_count: usize,
    bundle_count: usize,
    assets: Vec<PatchAsset>,
    bundles: Vec<PatchBundle>,
    raw_asset_ids: Vec<(i32, Vec<i32>)>,
    result: Option<ManifestResult<PatchManifest>>,
}

impl ManifestDecoder {
    /// Create a decoder over `data`.
    ///
    /// `records_per_step` is clamped to at least 1.
    pub fn new(data: Vec<u8>, records_per_step: usize) -> Self {
        Self {
            reader: BufferReader::new(data),
            records_per_step: records_per_step.max(1),
            step: DecodeStep::Header,
            header: Header::default(),
            asset_count: 0,
            bundle_count: 0,
            assets: Vec::new(),
            bundles: Vec::new(),
            raw_asset_ids: Vec::new(),
            result: None,
        }
    }

    /// Whether decoding finished (successfully or not).
    pub fn is_done(&self) -> bool {
        self.step == DecodeStep::Done
    }

    /// Fraction of records decoded.
    pub fn progress(&self) -> f32 {
        if self.is_done() {
            return 1.0;
        }
        let total = self.asset_count + self.bundle_count;
        if total == 0 {
            return 0.0;
        }
        (self.assets.len() + self.bundles.len()) as f32 / total as f32
    }

    /// Decode the next slice of records.
    pub fn update(&mut self) {
        if self.is_done() {
            return;
        }
        if let Err(e) = self.step_once() {
            warn!(error = %e, "Manifest decode failed");
            self.result = Some(Err(e));
            self.step = DecodeStep::Done;
        }
    }

    /// Take the decoded manifest.
    ///
    /// Returns the decode error if decoding failed. Must only be called once
    /// the decoder is done; calling it earlier reports an unexpected end of
    /// data at the current offset.
    pub fn finish(&mut self) -> ManifestResult<PatchManifest> {
        self.result.take().unwrap_or(Err(ManifestError::UnexpectedEof {
            offset: self.reader.position(),
            needed: 0,
        }))
    }

    fn step_once(&mut self) -> ManifestResult<()> {
        match self.step {
            DecodeStep::Header => {
                self.read_header()?;
                self.asset_count = read_count(&mut self.reader, "asset count")?;
                // Counts come from untrusted input; never reserve beyond the buffer size
                self.assets.reserve(self.asset_count.min(self.reader.remaining()));
                self.step = DecodeStep::Assets;
            }
            DecodeStep::Assets => {
                let end = self
                    .assets
                    .len()
                    .saturating_add(self.records_per_step)
                    .min(self.asset_count);
                while self.assets.len() < end {
                    let asset = self.read_asset()?;
                    self.assets.push(asset);
                }
                if self.assets.len() == self.asset_count {
                    self.step = DecodeStep::BundleCount;
                }
            }
            DecodeStep::BundleCount => {
                self.bundle_count = read_count(&mut self.reader, "bundle count")?;
                self.bundles.reserve(self.bundle_count.min(self.reader.remaining()));
                self.step = DecodeStep::Bundles;
            }
            DecodeStep::Bundles => {
                let end = self
                    .bundles
                    .len()
                    .saturating_add(self.records_per_step)
                    .min(self.bundle_count);
                while self.bundles.len() < end {
                    let bundle = self.read_bundle()?;
                    self.bundles.push(bundle);
                }
                if self.bundles.len() == self.bundle_count {
                    self.step = DecodeStep::Finalize;
                }
            }
            DecodeStep::Finalize => {
                let manifest = self.finalize()?;
                debug!(
                    package = %manifest.package_name,
                    version = %manifest.package_version,
                    assets = manifest.asset_list.len(),
                    bundles = manifest.bundle_list.len(),
                    "Manifest decoded"
                );
                self.result = Some(Ok(manifest));
                self.step = DecodeStep::Done;
            }
            DecodeStep::Done => {}
        }
        Ok(())
    }

    fn read_header(&mut self) -> ManifestResult<()> {
        let sign = self.reader.read_u32()?;
        if sign != MANIFEST_FILE_SIGN {
            return Err(ManifestError::InvalidSignature {
                expected: MANIFEST_FILE_SIGN,
                found: sign,
            });
        }

        let version = self.reader.read_utf8()?;
        if version != MANIFEST_FILE_VERSION {
            return Err(ManifestError::IncompatibleVersion {
                expected: MANIFEST_FILE_VERSION.to_string(),
                found: version,
            });
        }

        self.header.enable_addressable = self.reader.read_bool()?;
        self.header.output_name_style = OutputNameStyle::try_from(self.reader.read_i32()?)?;
        self.header.package_name = self.reader.read_utf8()?;
        self.header.package_version = self.reader.read_utf8()?;
        Ok(())
    }

    fn read_asset(&mut self) -> ManifestResult<PatchAsset> {
        let address = self.reader.read_utf8()?;
        let asset_path = self.reader.read_utf8()?;
        let asset_tags = self.reader.read_utf8_array()?;
        let bundle_id = self.reader.read_i32()?;
        let depend_ids = self.reader.read_i32_array()?;

        // Ids are validated once the bundle count is known
        self.raw_asset_ids.push((bundle_id, depend_ids));

        Ok(PatchAsset {
            address,
            asset_path,
            asset_tags,
            bundle_id: 0,
            depend_ids: Vec::new(),
        })
    }

    fn read_bundle(&mut self) -> ManifestResult<PatchBundle> {
        let name = self.reader.read_utf8()?;
        let hash = self.reader.read_utf8()?;
        let crc = self.reader.read_utf8()?;
        let size = self.reader.read_i64()?;
        let file_size = u64::try_from(size).map_err(|_| ManifestError::InvalidValue {
            field: "file size",
            value: size,
        })?;
        let is_raw_file = self.reader.read_bool()?;
        let load_method = BundleLoadMethod::try_from(self.reader.read_u8()?)?;
        let tags = self.reader.read_utf8_array()?;
        let reference_ids = self.reader.read_i32_array()?;

        let bundle = PatchBundle::new(name, hash, crc, file_size)
            .with_raw_file(is_raw_file)
            .with_load_method(load_method)
            .with_tags(tags)
            .with_reference_ids(reference_ids);
        check_file_hash(&bundle)?;
        Ok(bundle)
    }

    fn finalize(&mut self) -> ManifestResult<PatchManifest> {
        let count = self.bundle_count;
        let mut assets = mem::take(&mut self.assets);
        let raw_ids = mem::take(&mut self.raw_asset_ids);

        for (asset, (bundle_id, depend_ids)) in assets.iter_mut().zip(raw_ids) {
            let to_index = |id: i32| {
                usize::try_from(id)
                    .ok()
                    .filter(|&i| i < count)
                    .ok_or_else(|| ManifestError::InvalidBundleId {
                        asset_path: asset.asset_path.clone(),
                        id: id as i64,
                        count,
                    })
            };
            let main = to_index(bundle_id)?;
            let deps = depend_ids
                .into_iter()
                .map(to_index)
                .collect::<ManifestResult<Vec<_>>>()?;
            asset.bundle_id = main;
            asset.depend_ids = deps;
        }

        let header = mem::take(&mut self.header);
        PatchManifest::from_parts(
            header.enable_addressable,
            header.output_name_style,
            header.package_name,
            header.package_version,
            assets,
            mem::take(&mut self.bundles),
        )
    }
}

/// Async wrapper around [`ManifestDecoder`].
#[derive(Debug)]
pub struct DeserializeManifestOperation {
    decoder: ManifestDecoder,
    status: OperationStatus,
    manifest: Option<PatchManifest>,
    error: Option<String>,
    decode_error: Option<ManifestError>,
}

impl DeserializeManifestOperation {
    /// Start decoding `data`, at most `records_per_step` records per update.
    pub fn new(data: Vec<u8>, records_per_step: usize) -> Self {
        Self {
            decoder: ManifestDecoder::new(data, records_per_step),
            status: OperationStatus::None,
            manifest: None,
            error: None,
            decode_error: None,
        }
    }

    /// The decoded manifest; `None` until succeeded and after it is taken.
    pub fn manifest(&self) -> Option<&PatchManifest> {
        self.manifest.as_ref()
    }

    /// Take ownership of the decoded manifest.
    pub fn take_manifest(&mut self) -> Option<PatchManifest> {
        self.manifest.take()
    }

    /// The typed decode error, if decoding failed.
    pub fn decode_error(&self) -> Option<&ManifestError> {
        self.decode_error.as_ref()
    }
}

impl AsyncOperation for DeserializeManifestOperation {
    fn update(&mut self) {
        if self.status.is_done() {
            return;
        }
        self.status = OperationStatus::Processing;
        self.decoder.update();

        if self.decoder.is_done() {
            match self.decoder.finish() {
                Ok(manifest) => {
                    self.manifest = Some(manifest);
                    self.status = OperationStatus::Succeed;
                }
                Err(e) => {
                    self.error = Some(e.to_string());
                    self.decode_error = Some(e);
                    self.status = OperationStatus::Failed;
                }
            }
        }
    }

    fn status(&self) -> OperationStatus {
        self.status
    }

    fn progress(&self) -> f32 {
        self.decoder.progress()
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::test_support::sample_manifest;
    use proptest::prelude::*;

    #[test]
    fn test_round_trip_preserves_records_and_maps() {
        let manifest = sample_manifest(true);
        let bytes = serialize(&manifest).unwrap();
        let decoded = deserialize(&bytes).unwrap();

        assert_eq!(decoded.file_version, MANIFEST_FILE_VERSION);
        assert_eq!(decoded.package_name, "DefaultPackage");
        assert_eq!(decoded.package_version, "v1");
        assert!(decoded.enable_addressable);
        assert_eq!(decoded.asset_list, manifest.asset_list);
        assert_eq!(decoded.bundle_list, manifest.bundle_list);
        for asset in &manifest.asset_list {
            assert_eq!(decoded.try_get_asset(&asset.asset_path), Some(asset));
        }
        for bundle in &manifest.bundle_list {
            assert_eq!(decoded.try_get_bundle(&bundle.bundle_name), Some(bundle));
        }
    }

    #[test]
    fn test_signature_mismatch_is_format_error() {
        let mut bytes = serialize(&sample_manifest(false)).unwrap();
        bytes[..4].copy_from_slice(&0u32.to_le_bytes());

        let mut op = DeserializeManifestOperation::new(bytes, 10);
        op.wait_for_async_complete();

        assert_eq!(op.status(), OperationStatus::Failed);
        assert!(op.manifest().is_none());
        assert_eq!(
            op.decode_error(),
            Some(&ManifestError::InvalidSignature {
                expected: MANIFEST_FILE_SIGN,
                found: 0
            })
        );
        assert!(op.error().unwrap().contains("invalid manifest format"));
    }

    #[test]
    fn test_version_mismatch_is_incompatible() {
        let mut manifest = sample_manifest(false);
        manifest.file_version = "0.9.0".to_string();
        let bytes = serialize(&manifest).unwrap();

        assert_eq!(
            deserialize(&bytes).unwrap_err(),
            ManifestError::IncompatibleVersion {
                expected: MANIFEST_FILE_VERSION.to_string(),
                found: "0.9.0".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_asset_path_aborts_decode() {
        let mut manifest = sample_manifest(false);
        let dup = manifest.asset_list[0].clone();
        manifest.asset_list.push(dup);
        let bytes = serialize(&manifest).unwrap();

        assert!(matches!(
            deserialize(&bytes),
            Err(ManifestError::DuplicateAssetPath(_))
        ));
    }

    #[test]
    fn test_traversal_hash_aborts_decode() {
        let mut manifest = sample_manifest(false);
        manifest.bundle_list[1].file_hash = "../../../../escape".to_string();
        let bytes = serialize(&manifest).unwrap();

        assert_eq!(
            deserialize(&bytes).unwrap_err(),
            ManifestError::InvalidFileHash {
                bundle: manifest.bundle_list[1].bundle_name.clone(),
                hash: "../../../../escape".to_string(),
            }
        );
    }

    #[test]
    fn test_traversal_version_aborts_decode() {
        let mut manifest = sample_manifest(false);
        manifest.package_version = "../v1".to_string();
        let bytes = serialize(&manifest).unwrap();

        assert_eq!(
            deserialize(&bytes).unwrap_err(),
            ManifestError::InvalidPackageVersion("../v1".to_string())
        );
    }

    #[test]
    fn test_truncated_buffer() {
        let bytes = serialize(&sample_manifest(false)).unwrap();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(matches!(
            deserialize(truncated),
            Err(ManifestError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_invalid_bundle_id_in_stream() {
        let mut manifest = sample_manifest(false);
        // Bypass from_parts validation to produce a bad stream
        manifest.asset_list[0].bundle_id = 42;
        let bytes = serialize(&manifest).unwrap();

        assert!(matches!(
            deserialize(&bytes),
            Err(ManifestError::InvalidBundleId { id: 42, count: 4, .. })
        ));
    }

    #[test]
    fn test_incremental_progress_is_bounded_per_step() {
        let bundles: Vec<_> = (0..50)
            .map(|i| PatchBundle::new(format!("b{}.bundle", i), format!("{:04x}", i), "0", 1))
            .collect();
        let assets: Vec<_> = (0..50)
            .map(|i| PatchAsset::new("", format!("Assets/{}.asset", i), i, vec![]))
            .collect();
        let manifest =
            PatchManifest::from_parts(false, OutputNameStyle::HashName, "p", "v", assets, bundles)
                .unwrap();
        let bytes = serialize(&manifest).unwrap();

        let mut decoder = ManifestDecoder::new(bytes, 10);
        decoder.update();
        decoder.update();
        assert_eq!(decoder.progress(), 0.2);

        let mut steps = 2;
        while !decoder.is_done() {
            decoder.update();
            steps += 1;
        }
        assert_eq!(decoder.progress(), 1.0);
        // header + 5 asset slices + count + 5 bundle slices + finalize
        assert_eq!(steps, 13);
        assert_eq!(decoder.finish().unwrap().bundle_list.len(), 50);
    }

    fn arb_manifest() -> impl Strategy<Value = PatchManifest> {
        (1usize..8, 0usize..8, any::<bool>()).prop_flat_map(|(bundle_count, asset_count, addr)| {
            let bundles = proptest::collection::vec(
                ("[a-z0-9]{1,8}", any::<u32>(), 0u64..1_000_000, any::<bool>(), 0u8..4),
                bundle_count,
            );
            let deps = proptest::collection::vec(
                (0..bundle_count, proptest::collection::vec(0..bundle_count, 0..4)),
                asset_count,
            );
            (bundles, deps, Just(addr))
        })
        .prop_map(|(bundles, deps, addr)| {
            let bundles = bundles
                .into_iter()
                .enumerate()
                .map(|(i, (hash, crc, size, raw, method))| {
                    let name = format!("bundle_{}.bundle", i);
                    PatchBundle::new(name, hash, format!("{:08x}", crc), size)
                        .with_raw_file(raw)
                        .with_load_method(BundleLoadMethod::try_from(method).unwrap())
                        .with_tags(if i % 2 == 0 { vec!["even"] } else { vec![] })
                        .with_reference_ids(vec![i as i32])
                })
                .collect();
            let assets = deps
                .into_iter()
                .enumerate()
                .map(|(i, (main, depends))| {
                    let path = format!("Assets/{}.prefab", i);
                    PatchAsset::new(format!("addr_{}", i), path, main, depends)
                })
                .collect();
            PatchManifest::from_parts(
                addr,
                OutputNameStyle::BundleNameHashName,
                "pkg",
                "1.2.3",
                assets,
                bundles,
            )
            .unwrap()
        })
    }

    proptest! {
        /// Decoding an encoded manifest yields the same records.
        #[test]
        fn prop_round_trip(manifest in arb_manifest(), per_step in 1usize..5) {
            let bytes = serialize(&manifest).unwrap();
            let mut decoder = ManifestDecoder::new(bytes, per_step);
            while !decoder.is_done() {
                decoder.update();
            }
            let decoded = decoder.finish().unwrap();
            prop_assert_eq!(&decoded.asset_list, &manifest.asset_list);
            prop_assert_eq!(&decoded.bundle_list, &manifest.bundle_list);
            prop_assert_eq!(decoded.output_name_style, manifest.output_name_style);
        }
    }
}
