//! Block File Management Module
//!
//! This module owns the **physical layer** of one entry directory: the
//! fixed-size block data files, the record frame format, and the entry's
//! metadata files (`.descriptor` and `.settings`).
//!
//! ## Design Overview
//!
//! An entry directory looks like:
//!
//! ```text
//! <data_path>/<bucket>/<entry>/
//!   .settings          entry settings, checked binary
//!   .descriptor        entry descriptor, checked binary (the critical file)
//!   00000000.block     pre-allocated fixed-size data file
//!   00000001.block
//!   ...
//! ```
//!
//! Block data files are pre-allocated **sparsely** to exactly
//! `max_block_size` bytes when started, so the filesystem reserves the
//! address range up front while physical pages materialise only as records
//! land. Record payloads are written at the block's logical end; the
//! descriptor records which byte range belongs to which timestamp.
//!
//! # Record frame
//!
//! ```text
//! [FRAME_BYTES][FRAME_CRC32_LE]
//! ```
//!
//! where `FRAME_BYTES` encodes the blob plus an optional list of string
//! labels via [`crate::encoding`]. The trailing CRC32 covers `FRAME_BYTES`
//! and turns torn or misaddressed reads into [`BlockError::Corrupt`]
//! instead of garbage blobs.
//!
//! # Metadata files
//!
//! ```text
//! [MAGIC(4)][VERSION_LE(4)][PAYLOAD][CRC32_LE(4)]
//! ```
//!
//! Saves are crash-safe: the new content is written to a sibling temporary
//! file, fsynced, atomically renamed over the target, and the directory is
//! fsynced. A reader can observe the old file or the new file, never a
//! partial one.
//!
//! # Dead bytes
//!
//! An append whose descriptor save never completed leaves bytes inside the
//! block file that no descriptor references. Such bytes are invisible to
//! reads and are reclaimed only when the whole block is removed; no
//! compaction pass exists.

#[cfg(test)]
mod tests;

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::encoding::{self, Decode, Encode, EncodingError};

const U32_SIZE: usize = std::mem::size_of::<u32>();

/// Metadata file header size: 4-byte magic + 4-byte version.
const META_HEADER_SIZE: usize = 8;

/// File name of the entry descriptor inside an entry directory.
pub const DESCRIPTOR_FILENAME: &str = ".descriptor";

/// File name of the entry settings inside an entry directory.
pub const SETTINGS_FILENAME: &str = ".settings";

/// Suffix of the temporary sibling used for atomic metadata saves.
const META_TMP_SUFFIX: &str = ".tmp";

/// Magic bytes of the `.descriptor` file.
pub const DESCRIPTOR_MAGIC: [u8; 4] = *b"TSDS";

/// Magic bytes of the entry `.settings` file.
pub const ENTRY_SETTINGS_MAGIC: [u8; 4] = *b"TSES";

/// Current metadata format version, shared by all metadata files.
pub const META_VERSION: u32 = 1;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by block-level file operations.
#[derive(Debug, Error)]
pub enum BlockError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// On-disk data failed validation (checksum, magic, short read).
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Descriptor structures
// ------------------------------------------------------------------------------------------------

/// One timestamped record inside a block.
///
/// The payload bytes live in the block data file at `[begin, end)`;
/// `end - begin` is the stored frame size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Microseconds since the Unix epoch; unique within the entry.
    pub timestamp: i64,

    /// First byte of the frame inside the block file.
    pub begin: u64,

    /// One past the last byte of the frame.
    pub end: u64,
}

/// Descriptor of one fixed-size block data file.
///
/// Records are appended in write order, which for belated writes is not
/// timestamp order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Monotonic per-entry block id; also the data file name stem.
    pub id: u64,

    /// Timestamp of the first record ever written to this block.
    /// Absent until the block receives its first record.
    pub begin_time: Option<i64>,

    /// Maximum timestamp among the block's records.
    pub latest_record_time: Option<i64>,

    /// Bytes actually written (the block's logical end).
    pub size: u64,

    /// Records in write order.
    pub records: Vec<Record>,
}

impl Block {
    /// A fresh block with no records and no time range yet.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            begin_time: None,
            latest_record_time: None,
            size: 0,
            records: Vec::new(),
        }
    }

    /// True if no record has ever been written to this block.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True if `ts` falls inside the block's closed time interval.
    ///
    /// An empty block covers nothing.
    pub fn covers(&self, ts: i64) -> bool {
        match (self.begin_time, self.latest_record_time) {
            (Some(begin), Some(latest)) => begin <= ts && ts <= latest,
            _ => false,
        }
    }
}

/// The authoritative metadata of one entry: global time bounds, total
/// size, and the ordered block list. Persisted as `.descriptor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDescriptor {
    /// Entry creation time, microseconds since the Unix epoch.
    pub created_at: i64,

    /// Sum of `block.size` across all blocks.
    pub size: u64,

    /// Minimum `begin_time` across non-empty blocks.
    pub oldest_record_time: Option<i64>,

    /// Maximum `latest_record_time` across blocks.
    pub latest_record_time: Option<i64>,

    /// Blocks ordered by strictly increasing id. The tail block is the
    /// current write target.
    pub blocks: Vec<Block>,
}

impl EntryDescriptor {
    /// A fresh descriptor holding a single empty block with id 0.
    pub fn new(created_at: i64) -> Self {
        Self {
            created_at,
            size: 0,
            oldest_record_time: None,
            latest_record_time: None,
            blocks: vec![Block::new(0)],
        }
    }
}

/// Per-entry limits, persisted as `.settings` at entry creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySettings {
    /// Pre-allocated size of each block data file in bytes. A block stops
    /// accepting latest-case records once appending would cross this.
    pub max_block_size: u64,

    /// Maximum record count per block.
    pub max_block_records: u64,
}

impl Default for EntrySettings {
    fn default() -> Self {
        Self {
            max_block_size: 64 * 1024 * 1024,
            max_block_records: 1024,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Record frame
// ------------------------------------------------------------------------------------------------

/// One name/value label attached to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    /// Label name.
    pub name: String,

    /// Label value.
    pub value: String,
}

/// The envelope written to a block file for every record: the opaque blob
/// plus optional labels, CRC32-protected.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordFrame {
    /// The opaque record payload.
    pub blob: Vec<u8>,

    /// Optional metadata labels.
    pub labels: Vec<Label>,
}

impl RecordFrame {
    /// A frame carrying only a blob.
    pub fn from_blob(blob: Vec<u8>) -> Self {
        Self {
            blob,
            labels: Vec::new(),
        }
    }

    /// Serialize the frame to the exact bytes stored in a block file:
    /// the encoded payload followed by its CRC32.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BlockError> {
        let mut buf = encoding::encode_to_vec(self)?;
        let checksum = compute_crc(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        Ok(buf)
    }

    /// Parse a frame from the exact byte range read out of a block file.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlockError> {
        if bytes.len() < U32_SIZE {
            return Err(BlockError::Corrupt(format!(
                "record frame too short: {} bytes",
                bytes.len()
            )));
        }
        let (payload, crc_bytes) = bytes.split_at(bytes.len() - U32_SIZE);
        let mut stored = [0u8; U32_SIZE];
        stored.copy_from_slice(crc_bytes);
        let stored = u32::from_le_bytes(stored);

        if compute_crc(payload) != stored {
            return Err(BlockError::Corrupt("record frame checksum mismatch".into()));
        }

        let (frame, _) = encoding::decode_from_slice::<RecordFrame>(payload)?;
        Ok(frame)
    }
}

// ------------------------------------------------------------------------------------------------
// Encoding implementations
// ------------------------------------------------------------------------------------------------

impl Encode for Record {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.timestamp.encode_to(buf)?;
        self.begin.encode_to(buf)?;
        self.end.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Record {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (timestamp, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (begin, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (end, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                timestamp,
                begin,
                end,
            },
            offset,
        ))
    }
}

impl Encode for Block {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.id.encode_to(buf)?;
        self.begin_time.encode_to(buf)?;
        self.latest_record_time.encode_to(buf)?;
        self.size.encode_to(buf)?;
        encoding::encode_vec(&self.records, buf)?;
        Ok(())
    }
}

impl Decode for Block {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (begin_time, n) = Option::<i64>::decode_from(&buf[offset..])?;
        offset += n;
        let (latest_record_time, n) = Option::<i64>::decode_from(&buf[offset..])?;
        offset += n;
        let (size, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (records, n) = encoding::decode_vec::<Record>(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                id,
                begin_time,
                latest_record_time,
                size,
                records,
            },
            offset,
        ))
    }
}

impl Encode for EntryDescriptor {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.created_at.encode_to(buf)?;
        self.size.encode_to(buf)?;
        self.oldest_record_time.encode_to(buf)?;
        self.latest_record_time.encode_to(buf)?;
        encoding::encode_vec(&self.blocks, buf)?;
        Ok(())
    }
}

impl Decode for EntryDescriptor {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (created_at, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (size, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (oldest_record_time, n) = Option::<i64>::decode_from(&buf[offset..])?;
        offset += n;
        let (latest_record_time, n) = Option::<i64>::decode_from(&buf[offset..])?;
        offset += n;
        let (blocks, n) = encoding::decode_vec::<Block>(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                created_at,
                size,
                oldest_record_time,
                latest_record_time,
                blocks,
            },
            offset,
        ))
    }
}

impl Encode for EntrySettings {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.max_block_size.encode_to(buf)?;
        self.max_block_records.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for EntrySettings {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (max_block_size, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (max_block_records, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                max_block_size,
                max_block_records,
            },
            offset,
        ))
    }
}

impl Encode for Label {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.name.encode_to(buf)?;
        self.value.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Label {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (name, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        let (value, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        Ok((Self { name, value }, offset))
    }
}

impl Encode for RecordFrame {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.blob.encode_to(buf)?;
        encoding::encode_vec(&self.labels, buf)?;
        Ok(())
    }
}

impl Decode for RecordFrame {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (blob, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (labels, n) = encoding::decode_vec::<Label>(&buf[offset..])?;
        offset += n;
        Ok((Self { blob, labels }, offset))
    }
}

// ------------------------------------------------------------------------------------------------
// BlockManager
// ------------------------------------------------------------------------------------------------

/// Manages the physical files of one entry directory.
///
/// `BlockManager` performs raw file work only; it never interprets the
/// time-series semantics of what it stores. Callers (the entry layer)
/// hold the per-entry lock, so no two appends to the same block race
/// within a process. File handles are opened per operation and never
/// cached, keeping the descriptor footprint bounded.
#[derive(Debug)]
pub struct BlockManager {
    /// The entry directory this manager owns.
    dir: PathBuf,
}

impl BlockManager {
    /// Creates a manager for the given entry directory.
    ///
    /// The directory itself is created and removed by the entry layer.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The entry directory this manager operates on.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the data file for block `id`: `{id:08}.block`.
    pub fn block_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id:08}.block"))
    }

    /// Creates the data file for block `id` and pre-allocates it sparsely
    /// to exactly `max_size` bytes.
    ///
    /// On any failure the partially-created file is removed before the
    /// error is returned, so a failed allocation leaves no trace.
    pub fn allocate_block(&self, id: u64, max_size: u64) -> Result<(), BlockError> {
        let path = self.block_path(id);

        let result = (|| -> io::Result<()> {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)?;
            file.set_len(max_size)?;
            file.sync_all()?;
            Ok(())
        })();

        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "block allocation failed, removing partial file");
            let _ = fs::remove_file(&path);
            return Err(BlockError::Io(e));
        }

        debug!(path = %path.display(), max_size, "block allocated");
        Ok(())
    }

    /// Writes `payload` into block `id` at the block's logical end
    /// `offset` and returns the `(begin, end)` byte range it occupies.
    ///
    /// The write lands inside the pre-allocated region, so the file stays
    /// at its allocated length unless a single oversized record spills
    /// past it.
    pub fn append_record(
        &self,
        id: u64,
        offset: u64,
        payload: &[u8],
    ) -> Result<(u64, u64), BlockError> {
        let path = self.block_path(id);
        let mut file = OpenOptions::new().write(true).open(&path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(payload)?;
        file.sync_all()?;

        let end = offset + payload.len() as u64;
        trace!(path = %path.display(), offset, len = payload.len(), "record appended");
        Ok((offset, end))
    }

    /// Reads exactly the byte range `[begin, end)` from block `id`.
    ///
    /// The file is memory-mapped read-only for the duration of the call;
    /// a range that does not fit inside the file means the descriptor and
    /// the data file disagree and is reported as [`BlockError::Corrupt`].
    pub fn read_record(&self, id: u64, begin: u64, end: u64) -> Result<Vec<u8>, BlockError> {
        if begin >= end {
            return Err(BlockError::Internal(format!(
                "invalid record range [{begin}, {end})"
            )));
        }

        let path = self.block_path(id);
        let file = File::open(&path)?;
        // SAFETY: the mapping is read-only and lives only for this call.
        // Writers touch disjoint (higher) offsets under the entry lock.
        let map = unsafe { Mmap::map(&file)? };

        let (begin, end) = (begin as usize, end as usize);
        if end > map.len() {
            return Err(BlockError::Corrupt(format!(
                "record range [{begin}, {end}) exceeds block file size {}",
                map.len()
            )));
        }

        trace!(path = %path.display(), begin, end, "record read");
        Ok(map[begin..end].to_vec())
    }

    /// Deletes the data file of block `id`. Missing files are ignored,
    /// so removal is idempotent.
    pub fn remove_block(&self, id: u64) -> Result<(), BlockError> {
        let path = self.block_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "block removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlockError::Io(e)),
        }
    }

    /// Loads and validates the entry descriptor.
    pub fn load_descriptor(&self) -> Result<EntryDescriptor, BlockError> {
        let payload = read_meta_file(
            &self.dir.join(DESCRIPTOR_FILENAME),
            DESCRIPTOR_MAGIC,
            META_VERSION,
        )?;
        let (descriptor, _) = encoding::decode_from_slice::<EntryDescriptor>(&payload)?;
        Ok(descriptor)
    }

    /// Persists the entry descriptor crash-safely (temp file + atomic
    /// rename + directory fsync). This is the commit point of every
    /// write: bytes appended to a block become visible only once the
    /// descriptor referencing them has been renamed into place.
    pub fn save_descriptor(&self, descriptor: &EntryDescriptor) -> Result<(), BlockError> {
        let payload = encoding::encode_to_vec(descriptor)?;
        write_meta_file(
            &self.dir.join(DESCRIPTOR_FILENAME),
            DESCRIPTOR_MAGIC,
            META_VERSION,
            &payload,
        )
    }

    /// Loads and validates the entry settings.
    pub fn load_settings(&self) -> Result<EntrySettings, BlockError> {
        let payload = read_meta_file(
            &self.dir.join(SETTINGS_FILENAME),
            ENTRY_SETTINGS_MAGIC,
            META_VERSION,
        )?;
        let (settings, _) = encoding::decode_from_slice::<EntrySettings>(&payload)?;
        Ok(settings)
    }

    /// Persists the entry settings with the same crash-safe discipline
    /// as the descriptor.
    pub fn save_settings(&self, settings: &EntrySettings) -> Result<(), BlockError> {
        let payload = encoding::encode_to_vec(settings)?;
        write_meta_file(
            &self.dir.join(SETTINGS_FILENAME),
            ENTRY_SETTINGS_MAGIC,
            META_VERSION,
            &payload,
        )
    }
}

// ------------------------------------------------------------------------------------------------
// Metadata file I/O
//
// Shared by the entry layer (descriptor, entry settings) and the bucket
// layer (bucket settings).
// ------------------------------------------------------------------------------------------------

/// Writes `[magic][version][payload][crc32]` to `path` crash-safely:
/// temp sibling, fsync, atomic rename, directory fsync.
pub(crate) fn write_meta_file(
    path: &Path,
    magic: [u8; 4],
    version: u32,
    payload: &[u8],
) -> Result<(), BlockError> {
    let mut buf = Vec::with_capacity(META_HEADER_SIZE + payload.len() + U32_SIZE);
    buf.extend_from_slice(&magic);
    buf.extend_from_slice(&version.to_le_bytes());
    buf.extend_from_slice(payload);
    let checksum = compute_crc(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| BlockError::Internal(format!("invalid meta path {}", path.display())))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!("{file_name}{META_TMP_SUFFIX}"));

    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;
    fsync_dir(dir)?;

    trace!(path = %path.display(), bytes = buf.len(), "metadata file saved");
    Ok(())
}

/// Reads a metadata file written by [`write_meta_file`], verifying the
/// checksum, magic, and version before handing back the payload.
pub(crate) fn read_meta_file(
    path: &Path,
    magic: [u8; 4],
    version: u32,
) -> Result<Vec<u8>, BlockError> {
    let mut file = File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    if buf.len() < META_HEADER_SIZE + U32_SIZE {
        return Err(BlockError::Corrupt(format!(
            "metadata file {} too short: {} bytes",
            path.display(),
            buf.len()
        )));
    }

    let (body, crc_bytes) = buf.split_at(buf.len() - U32_SIZE);
    let mut stored = [0u8; U32_SIZE];
    stored.copy_from_slice(crc_bytes);
    let stored = u32::from_le_bytes(stored);

    if compute_crc(body) != stored {
        return Err(BlockError::Corrupt(format!(
            "metadata file {} checksum mismatch",
            path.display()
        )));
    }

    if body[..4] != magic {
        return Err(BlockError::Corrupt(format!(
            "metadata file {} has wrong magic",
            path.display()
        )));
    }

    let mut version_bytes = [0u8; U32_SIZE];
    version_bytes.copy_from_slice(&body[4..META_HEADER_SIZE]);
    let found = u32::from_le_bytes(version_bytes);
    if found != version {
        return Err(BlockError::Corrupt(format!(
            "metadata file {} has unsupported version {found}",
            path.display()
        )));
    }

    Ok(body[META_HEADER_SIZE..].to_vec())
}

/// Fsync a directory so a preceding rename inside it is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), BlockError> {
    let dir_file = File::open(dir)?;
    dir_file.sync_all()?;
    Ok(())
}

/// Computes a CRC32 checksum over `data`.
fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(data);
    hasher.finalize()
}
