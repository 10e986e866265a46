//! Built-in content: offline resolution, unpacking and download exclusion.

mod common;

use assetpatch::operation::{AsyncOperation, OperationStatus};
use assetpatch::playmode::{LoadSource, PlayModeKind};

use common::{bring_up_to_date, drive, BundleSpec, CountingTransport, Fixture};

fn shipped() -> Vec<BundleSpec> {
    vec![
        BundleSpec::new("core.bundle", "c0c0c0", b"core shipped with the app"),
        BundleSpec::new("intro.bundle", "1a1a1a", b"intro cinematic").tagged("intro"),
    ]
}

#[test]
fn test_offline_resolves_builtin_and_never_downloads() {
    let fixture = Fixture::new();
    fixture.publish_builtin("b1", &shipped());
    let transport = CountingTransport::new();
    let package = fixture.package(PlayModeKind::Offline, transport.clone());

    let mut init = package.initialize();
    init.wait_for_async_complete();
    assert_eq!(init.status(), OperationStatus::Succeed, "{:?}", init.error());
    assert_eq!(package.package_version().as_deref(), Some("b1"));

    let info = package.bundle_info("intro").unwrap();
    assert_eq!(info.source, LoadSource::Builtin);
    assert!(info.builtin_path.unwrap().exists());

    let downloader = package.create_patch_downloader_by_all().unwrap();
    assert_eq!(downloader.total_download_count(), 0);
    assert!(transport.requests().is_empty());
}

#[test]
fn test_offline_without_builtin_fails() {
    let fixture = Fixture::new();
    let package = fixture.package(PlayModeKind::Offline, CountingTransport::new());

    let mut init = package.initialize();
    init.wait_for_async_complete();
    assert_eq!(init.status(), OperationStatus::Failed);
    assert!(package.package_version().is_none());
}

#[test]
fn test_host_unpacks_builtin_into_cache() {
    let fixture = Fixture::new();
    let builtin = fixture.publish_builtin("b1", &shipped());
    let transport = CountingTransport::new();
    let package = fixture.package(PlayModeKind::Host, transport.clone());

    let mut init = package.initialize();
    init.wait_for_async_complete();
    assert_eq!(package.package_version().as_deref(), Some("b1"));
    assert_eq!(package.bundle_info("core").unwrap().source, LoadSource::Builtin);

    let mut unpacker = package
        .create_patch_unpacker_by_tags(&["intro".to_string()])
        .unwrap();
    assert_eq!(unpacker.total_download_count(), 2);
    drive(&package, &mut unpacker);
    assert_eq!(unpacker.status(), OperationStatus::Succeed, "{:?}", unpacker.error());

    for bundle in &builtin.bundle_list {
        assert!(package.cache().is_bundle_cached(bundle));
    }
    assert_eq!(package.bundle_info("intro").unwrap().source, LoadSource::Cache);
    assert_eq!(package.create_patch_unpacker_by_all().unwrap().total_download_count(), 0);

    // Only local files were read
    let builtin_root = fixture.builtin_root().to_string_lossy().into_owned();
    assert!(transport.requests().iter().all(|u| u.starts_with(&builtin_root)));
}

#[test]
fn test_host_download_skips_builtin_bundles() {
    let fixture = Fixture::new();
    fixture.publish_builtin("b1", &shipped());
    let mut remote = shipped();
    remote.push(BundleSpec::new("dlc.bundle", "d1c0de", b"downloadable content").tagged("dlc"));
    fixture.publish_remote("r2", &remote);

    let transport = CountingTransport::new();
    let package = fixture.package(PlayModeKind::Host, transport.clone());
    assert_eq!(bring_up_to_date(&package), "r2");

    let list = package.create_patch_downloader_by_all().unwrap();
    assert_eq!(list.total_download_count(), 1);

    let mut downloader = package
        .create_patch_downloader_by_tags(&["dlc".to_string(), "intro".to_string()])
        .unwrap();
    assert_eq!(downloader.total_download_count(), 1);
    drive(&package, &mut downloader);
    assert_eq!(downloader.status(), OperationStatus::Succeed);

    assert_eq!(package.bundle_info("dlc").unwrap().source, LoadSource::Cache);
    assert_eq!(package.bundle_info("intro").unwrap().source, LoadSource::Builtin);
    assert_eq!(transport.count_matching("c0c0c0.bundle"), 0);
}
