//! Tests for the endpoint façade and the status-code mapping.

use std::sync::Arc;

use tempfile::TempDir;

use crate::api::{Api, Components, status_code};
use crate::asset::EmptyAssetManager;
use crate::auth::BootstrapTokenRepository;
use crate::bucket::BucketSettings;
use crate::storage::Storage;

fn api(tmp: &TempDir, bootstrap: &str) -> Api {
    Api::new(Components {
        storage: Arc::new(Storage::open(tmp.path()).unwrap()),
        token_repo: Arc::new(BootstrapTokenRepository::new(bootstrap)),
        assets: Arc::new(EmptyAssetManager),
    })
}

#[test]
fn alive_always_succeeds() {
    let tmp = TempDir::new().unwrap();
    assert_eq!(api(&tmp, "").alive(), 200);
}

#[test]
fn record_roundtrip_through_facade() {
    let tmp = TempDir::new().unwrap();
    let api = api(&tmp, "");

    api.create_bucket("metrics", BucketSettings::default())
        .unwrap();
    api.write_record("metrics", "cpu", 1_000_000, b"0.75".to_vec())
        .unwrap();

    assert_eq!(api.read_record("metrics", "cpu", 1_000_000).unwrap(), b"0.75");

    let records = api.list_records("metrics", "cpu", 0, i64::MAX).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].timestamp, 1_000_000);

    let info = api.info().unwrap();
    assert_eq!(info.bucket_count, 1);
    assert_eq!(info.entry_count, 1);

    let list = api.list().unwrap();
    assert_eq!(list[0].name, "metrics");

    assert_eq!(api.bucket_info("metrics").unwrap().record_count, 1);

    api.remove_bucket("metrics").unwrap();
    assert!(api.bucket_info("metrics").is_err());
}

#[test]
fn authorization_delegates_to_repository() {
    let tmp = TempDir::new().unwrap();

    let open = api(&tmp, "");
    open.authorize(None).unwrap();
    open.authorize(Some("whatever")).unwrap();

    let tmp = TempDir::new().unwrap();
    let locked = api(&tmp, "secret");
    locked.authorize(Some("secret")).unwrap();
    assert!(locked.authorize(None).is_err());
    assert!(locked.authorize(Some("wrong")).is_err());
}

#[test]
fn status_codes_follow_the_error_taxonomy() {
    let tmp = TempDir::new().unwrap();
    let api = api(&tmp, "");
    api.create_bucket("b", BucketSettings::default()).unwrap();
    api.write_record("b", "e", 10, b"x".to_vec()).unwrap();

    // 404 — unknown bucket, unknown entry, unknown timestamp.
    let err = api.read_record("ghost", "e", 10).unwrap_err();
    assert_eq!(status_code(&err), 404);
    let err = api.read_record("b", "ghost", 10).unwrap_err();
    assert_eq!(status_code(&err), 404);
    let err = api.read_record("b", "e", 11).unwrap_err();
    assert_eq!(status_code(&err), 404);

    // 409 — duplicate bucket, duplicate timestamp.
    let err = api
        .create_bucket("b", BucketSettings::default())
        .unwrap_err();
    assert_eq!(status_code(&err), 409);
    let err = api.write_record("b", "e", 10, b"dup".to_vec()).unwrap_err();
    assert_eq!(status_code(&err), 409);

    // 422 — inverted interval, invalid name.
    let err = api.list_records("b", "e", 10, 5).unwrap_err();
    assert_eq!(status_code(&err), 422);
    let err = api
        .create_bucket("bad name", BucketSettings::default())
        .unwrap_err();
    assert_eq!(status_code(&err), 422);
}

#[test]
fn quota_errors_map_to_507() {
    use crate::bucket::QuotaType;

    let tmp = TempDir::new().unwrap();
    let api = api(&tmp, "");
    api.create_bucket(
        "b",
        BucketSettings {
            quota_type: QuotaType::Fifo,
            quota_size: 1,
            max_block_size: 1024,
            max_block_records: 1024,
        },
    )
    .unwrap();

    let err = api.write_record("b", "e", 10, vec![0u8; 64]).unwrap_err();
    assert_eq!(status_code(&err), 507);
}

#[test]
fn assets_are_served_through_the_facade() {
    let tmp = TempDir::new().unwrap();
    let api = api(&tmp, "");
    assert!(api.asset("console/index.html").is_err());
}
