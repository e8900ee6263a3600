//! Tests for the bucket registry: creation, lookup, removal, startup
//! scanning, and aggregate reporting.

use std::fs;

use tempfile::TempDir;

use crate::bucket::BucketSettings;
use crate::storage::{Storage, StorageError};

#[test]
fn open_creates_missing_root() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("nested/data");

    let storage = Storage::open(&root).unwrap();
    assert!(root.is_dir());
    assert_eq!(storage.info().unwrap().bucket_count, 0);
}

#[test]
fn create_get_remove_bucket() {
    let tmp = TempDir::new().unwrap();
    let storage = Storage::open(tmp.path()).unwrap();

    storage
        .create_bucket("metrics", BucketSettings::default())
        .unwrap();
    assert!(tmp.path().join("metrics/.settings").exists());

    let bucket = storage.get_bucket("metrics").unwrap();
    assert_eq!(bucket.name(), "metrics");

    storage.remove_bucket("metrics").unwrap();
    assert!(!tmp.path().join("metrics").exists());
    assert!(matches!(
        storage.get_bucket("metrics").unwrap_err(),
        StorageError::NotFound(_)
    ));
}

#[test]
fn create_duplicate_is_conflict() {
    let tmp = TempDir::new().unwrap();
    let storage = Storage::open(tmp.path()).unwrap();

    storage
        .create_bucket("metrics", BucketSettings::default())
        .unwrap();
    let err = storage
        .create_bucket("metrics", BucketSettings::default())
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));
}

#[test]
fn invalid_bucket_name_is_unprocessable() {
    let tmp = TempDir::new().unwrap();
    let storage = Storage::open(tmp.path()).unwrap();

    for name in ["", "no/slashes", "no spaces"] {
        let err = storage
            .create_bucket(name, BucketSettings::default())
            .unwrap_err();
        assert!(matches!(err, StorageError::UnprocessableEntity(_)));
    }
}

#[test]
fn remove_missing_bucket_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let storage = Storage::open(tmp.path()).unwrap();

    let err = storage.remove_bucket("ghost").unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[test]
fn reopen_recovers_buckets_and_records() {
    let tmp = TempDir::new().unwrap();
    {
        let storage = Storage::open(tmp.path()).unwrap();
        let bucket = storage
            .create_bucket("metrics", BucketSettings::default())
            .unwrap();
        bucket
            .write("cpu", b"0.93".to_vec(), 1_000, Vec::new())
            .unwrap();
        bucket
            .write("mem", b"0.41".to_vec(), 2_000, Vec::new())
            .unwrap();
    }

    let storage = Storage::open(tmp.path()).unwrap();
    let bucket = storage.get_bucket("metrics").unwrap();
    assert_eq!(bucket.read("cpu", 1_000).unwrap().blob, b"0.93");
    assert_eq!(bucket.read("mem", 2_000).unwrap().blob, b"0.41");

    let info = storage.info().unwrap();
    assert_eq!(info.bucket_count, 1);
    assert_eq!(info.entry_count, 2);
}

#[test]
fn broken_bucket_is_isolated_at_startup() {
    let tmp = TempDir::new().unwrap();
    {
        let storage = Storage::open(tmp.path()).unwrap();
        storage
            .create_bucket("good", BucketSettings::default())
            .unwrap();
        storage
            .create_bucket("bad", BucketSettings::default())
            .unwrap();
    }

    // Destroy the bad bucket's settings file.
    fs::write(tmp.path().join("bad/.settings"), b"not a settings file").unwrap();

    let storage = Storage::open(tmp.path()).unwrap();
    assert!(storage.get_bucket("good").is_ok());
    assert!(matches!(
        storage.get_bucket("bad").unwrap_err(),
        StorageError::NotFound(_)
    ));
    assert_eq!(storage.info().unwrap().bucket_count, 1);
}

#[test]
fn info_and_list_aggregate() {
    let tmp = TempDir::new().unwrap();
    let storage = Storage::open(tmp.path()).unwrap();

    let alpha = storage
        .create_bucket("alpha", BucketSettings::default())
        .unwrap();
    let beta = storage
        .create_bucket("beta", BucketSettings::default())
        .unwrap();

    alpha.write("e1", b"x".to_vec(), 1, Vec::new()).unwrap();
    beta.write("e1", b"y".to_vec(), 2, Vec::new()).unwrap();
    beta.write("e2", b"z".to_vec(), 3, Vec::new()).unwrap();

    let info = storage.info().unwrap();
    assert_eq!(info.bucket_count, 2);
    assert_eq!(info.entry_count, 3);
    assert!(info.bytes > 0);

    let list = storage.list().unwrap();
    let names: Vec<&str> = list.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["alpha", "beta"]);
    assert_eq!(list[1].info.entry_count, 2);
}

#[test]
fn plain_files_in_root_are_ignored() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("stray.txt"), b"ignore me").unwrap();

    let storage = Storage::open(tmp.path()).unwrap();
    assert_eq!(storage.info().unwrap().bucket_count, 0);
}
