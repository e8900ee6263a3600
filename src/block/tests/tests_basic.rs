//! Tests for block data file operations: allocation, appends, range
//! reads, and removal.

use std::fs;

use tempfile::TempDir;

use crate::block::{BlockError, BlockManager};

fn manager(tmp: &TempDir) -> BlockManager {
    BlockManager::new(tmp.path())
}

#[test]
fn allocate_creates_fixed_size_file() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);

    manager.allocate_block(0, 1024).unwrap();

    let path = manager.block_path(0);
    assert!(path.ends_with("00000000.block"));
    assert_eq!(fs::metadata(&path).unwrap().len(), 1024);
}

#[test]
fn block_path_is_zero_padded() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);
    assert!(manager.block_path(42).ends_with("00000042.block"));
    assert!(manager.block_path(12_345_678).ends_with("12345678.block"));
}

#[test]
fn append_returns_byte_range_and_keeps_file_size() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);
    manager.allocate_block(0, 1024).unwrap();

    let (begin, end) = manager.append_record(0, 0, b"first record").unwrap();
    assert_eq!((begin, end), (0, 12));

    let (begin, end) = manager.append_record(0, end, b"second").unwrap();
    assert_eq!((begin, end), (12, 18));

    // Appends land inside the pre-allocated region.
    assert_eq!(fs::metadata(manager.block_path(0)).unwrap().len(), 1024);
}

#[test]
fn read_returns_exact_range() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);
    manager.allocate_block(0, 256).unwrap();

    manager.append_record(0, 0, b"abcdef").unwrap();
    manager.append_record(0, 6, b"ghijkl").unwrap();

    assert_eq!(manager.read_record(0, 0, 6).unwrap(), b"abcdef");
    assert_eq!(manager.read_record(0, 6, 12).unwrap(), b"ghijkl");
    assert_eq!(manager.read_record(0, 3, 9).unwrap(), b"defghi");
}

#[test]
fn read_past_file_end_is_corrupt() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);
    manager.allocate_block(0, 64).unwrap();

    let err = manager.read_record(0, 0, 65).unwrap_err();
    assert!(matches!(err, BlockError::Corrupt(_)));
}

#[test]
fn read_inverted_range_is_internal() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);
    manager.allocate_block(0, 64).unwrap();

    let err = manager.read_record(0, 10, 10).unwrap_err();
    assert!(matches!(err, BlockError::Internal(_)));
}

#[test]
fn remove_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);
    manager.allocate_block(0, 64).unwrap();

    manager.remove_block(0).unwrap();
    assert!(!manager.block_path(0).exists());

    // Second removal of a missing file is not an error.
    manager.remove_block(0).unwrap();
}

#[test]
fn append_to_missing_block_is_io_error() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);

    let err = manager.append_record(7, 0, b"data").unwrap_err();
    assert!(matches!(err, BlockError::Io(_)));
}

#[test]
fn oversized_record_spills_past_allocation() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);
    manager.allocate_block(0, 8).unwrap();

    let payload = vec![0xAA; 32];
    let (begin, end) = manager.append_record(0, 0, &payload).unwrap();
    assert_eq!((begin, end), (0, 32));
    assert_eq!(fs::metadata(manager.block_path(0)).unwrap().len(), 32);
    assert_eq!(manager.read_record(0, 0, 32).unwrap(), payload);
}
