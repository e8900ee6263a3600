//! Tests for entry recovery: restore after drop, corruption reporting,
//! and orphan block cleanup.

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};

use tempfile::TempDir;

use crate::block::{BlockManager, EntrySettings};
use crate::entry::{Entry, EntryError, EntryOptions};

fn entry_with(tmp: &TempDir, settings: EntrySettings) -> Entry {
    Entry::create(EntryOptions {
        name: "stream".to_string(),
        path: tmp.path().to_path_buf(),
        settings,
    })
    .unwrap()
}

#[test]
fn restore_recovers_all_records() {
    let tmp = TempDir::new().unwrap();
    let mut entry = entry_with(
        &tmp,
        EntrySettings {
            max_block_size: 128,
            max_block_records: 4,
        },
    );

    for ts in 1..=20i64 {
        entry
            .write(format!("payload-{ts}").into_bytes(), ts, Vec::new())
            .unwrap();
    }
    let info_before = entry.info();
    let path = entry.path().to_path_buf();
    drop(entry);

    let restored = Entry::restore(&path).unwrap();
    assert_eq!(restored.info(), info_before);

    for ts in 1..=20i64 {
        assert_eq!(
            restored.read(ts).unwrap().blob,
            format!("payload-{ts}").into_bytes()
        );
    }
}

#[test]
fn restore_missing_directory_is_error() {
    let tmp = TempDir::new().unwrap();
    let err = Entry::restore(tmp.path().join("nope")).unwrap_err();
    assert!(matches!(err, EntryError::Block(_)));
}

#[test]
fn restore_corrupt_descriptor_is_reported() {
    let tmp = TempDir::new().unwrap();
    let mut entry = entry_with(&tmp, EntrySettings::default());
    entry.write(b"data".to_vec(), 1, Vec::new()).unwrap();
    let path = entry.path().to_path_buf();
    drop(entry);

    let descriptor_path = path.join(".descriptor");
    let mut file = OpenOptions::new()
        .write(true)
        .open(&descriptor_path)
        .unwrap();
    file.seek(SeekFrom::Start(10)).unwrap();
    file.write_all(&[0xFF, 0xFF, 0xFF]).unwrap();
    file.sync_all().unwrap();

    let err = Entry::restore(&path).unwrap_err();
    assert!(matches!(err, EntryError::Block(_)));
}

#[test]
fn restore_rejects_mismatched_oldest_time() {
    let tmp = TempDir::new().unwrap();
    let mut entry = entry_with(&tmp, EntrySettings::default());
    entry.write(b"a".to_vec(), 10, Vec::new()).unwrap();
    entry.write(b"b".to_vec(), 30, Vec::new()).unwrap();
    let path = entry.path().to_path_buf();
    drop(entry);

    // Rewrite the descriptor with a valid checksum but a top-level
    // oldest time that disagrees with the blocks.
    let manager = BlockManager::new(&path);
    let mut descriptor = manager.load_descriptor().unwrap();
    descriptor.oldest_record_time = Some(5);
    manager.save_descriptor(&descriptor).unwrap();

    let err = Entry::restore(&path).unwrap_err();
    assert!(matches!(err, EntryError::Corrupt(_)));
}

#[test]
fn restore_rejects_mismatched_latest_time() {
    let tmp = TempDir::new().unwrap();
    let mut entry = entry_with(&tmp, EntrySettings::default());
    entry.write(b"a".to_vec(), 10, Vec::new()).unwrap();
    entry.write(b"b".to_vec(), 30, Vec::new()).unwrap();
    let path = entry.path().to_path_buf();
    drop(entry);

    let manager = BlockManager::new(&path);
    let mut descriptor = manager.load_descriptor().unwrap();
    descriptor.latest_record_time = Some(999);
    manager.save_descriptor(&descriptor).unwrap();

    let err = Entry::restore(&path).unwrap_err();
    assert!(matches!(err, EntryError::Corrupt(_)));
}

#[test]
fn restore_removes_orphan_block_files() {
    let tmp = TempDir::new().unwrap();
    let mut entry = entry_with(&tmp, EntrySettings::default());
    entry.write(b"data".to_vec(), 1, Vec::new()).unwrap();
    let path = entry.path().to_path_buf();
    drop(entry);

    // A block file no descriptor references, as left by a crash between
    // allocation and descriptor save.
    fs::write(path.join("00000009.block"), b"orphan bytes").unwrap();

    let restored = Entry::restore(&path).unwrap();
    assert!(!path.join("00000009.block").exists());
    assert_eq!(restored.read(1).unwrap().blob, b"data");
}

#[test]
fn restore_keeps_referenced_blocks() {
    let tmp = TempDir::new().unwrap();
    let mut entry = entry_with(
        &tmp,
        EntrySettings {
            max_block_size: 1,
            max_block_records: 1024,
        },
    );
    for ts in [10, 20, 30] {
        entry.write(format!("r{ts}").into_bytes(), ts, Vec::new()).unwrap();
    }
    let path = entry.path().to_path_buf();
    drop(entry);

    let restored = Entry::restore(&path).unwrap();
    assert!(path.join("00000000.block").exists());
    assert!(path.join("00000001.block").exists());
    assert!(path.join("00000002.block").exists());
    assert_eq!(restored.info().block_count, 3);
}

#[test]
fn unreferenced_appended_bytes_stay_invisible() {
    // Simulates a crash after the block append but before the
    // descriptor save: the bytes exist on disk, no reader sees them.
    let tmp = TempDir::new().unwrap();
    let mut entry = entry_with(&tmp, EntrySettings::default());
    entry.write(b"committed".to_vec(), 10, Vec::new()).unwrap();
    let path = entry.path().to_path_buf();
    drop(entry);

    // Scribble extra bytes past the committed region of the block file.
    let block_path = path.join("00000000.block");
    let mut file = OpenOptions::new().write(true).open(&block_path).unwrap();
    file.seek(SeekFrom::Start(64)).unwrap();
    file.write_all(b"uncommitted garbage").unwrap();
    file.sync_all().unwrap();

    let restored = Entry::restore(&path).unwrap();
    assert_eq!(restored.read(10).unwrap().blob, b"committed");
    assert_eq!(restored.info().record_count, 1);
    assert!(restored.read(64).is_err());
}
