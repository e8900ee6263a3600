//! Entry Module
//!
//! An **entry** is one logical time-series stream: a directory of
//! fixed-size block files plus a single descriptor listing which record
//! lives where. This module implements the time-series semantics on top
//! of [`crate::block`]: write classification (latest vs. belated),
//! timestamp navigation, range listings, and head-block eviction.
//!
//! ## Write classification
//!
//! Every write is classified before any I/O happens:
//!
//! - **Latest** — the timestamp is newer than everything stored (or the
//!   entry is empty). Goes to the tail block, rolling over to a fresh
//!   block when the append would cross `max_block_size` or
//!   `max_block_records`.
//! - **BelatedFirst** — the timestamp precedes the oldest stored record.
//!   Goes to the head block and lowers its `begin_time`.
//! - **Belated** — the timestamp falls inside the stored range. Goes to
//!   the block whose time interval covers it, found by binary search.
//!
//! Duplicate timestamps are rejected with [`EntryError::Conflict`];
//! a timestamp identifies exactly one record within an entry.
//!
//! ## Durability
//!
//! The descriptor save (atomic rename) is the **last** step of every
//! mutation. A crash or I/O failure before it leaves the previous
//! descriptor intact; bytes already appended to a block file are then
//! unreferenced and invisible to reads.
//!
//! ## Concurrency
//!
//! `Entry` methods take `&mut self` / `&self` and expect the caller (the
//! bucket layer) to wrap each entry in its own exclusive lock. Operations
//! serialize within an entry but never across entries.

#[cfg(test)]
mod tests;

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::block::{
    Block, BlockError, BlockManager, EntryDescriptor, EntrySettings, Label, Record, RecordFrame,
};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by entry operations.
#[derive(Debug, Error)]
pub enum EntryError {
    /// Underlying block-file failure.
    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No record, or no records in the requested range.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate creation or duplicate timestamp.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Semantically invalid arguments.
    #[error("Unprocessable: {0}")]
    UnprocessableEntity(String),

    /// On-disk state failed to parse or violates descriptor invariants.
    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    /// Invariant violated at runtime.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Public data types
// ------------------------------------------------------------------------------------------------

/// Options for creating a new entry.
#[derive(Debug, Clone)]
pub struct EntryOptions {
    /// Entry name; becomes the directory name.
    pub name: String,

    /// Parent directory (the bucket directory).
    pub path: PathBuf,

    /// Block sizing limits.
    pub settings: EntrySettings,
}

/// Snapshot of an entry's state returned by [`Entry::info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Number of blocks, including an empty tail block.
    pub block_count: u64,

    /// Total number of records across all blocks.
    pub record_count: u64,

    /// Total bytes of stored record frames.
    pub bytes: u64,

    /// Timestamp of the oldest record, if any.
    pub oldest_record_time: Option<i64>,

    /// Timestamp of the newest record, if any.
    pub latest_record_time: Option<i64>,

    /// Entry creation time, microseconds since the Unix epoch.
    pub created_at: i64,
}

/// One element of a [`Entry::list`] result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordInfo {
    /// Record timestamp, microseconds since the Unix epoch.
    pub timestamp: i64,

    /// Stored frame size in bytes.
    pub size: u64,
}

/// Classification of a write relative to the entry's time bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    /// Newer than everything stored; targets the tail block.
    Latest,

    /// Older than the oldest stored record; targets the head block.
    BelatedFirst,

    /// Inside the stored range; targets the covering block index.
    Belated(usize),
}

// ------------------------------------------------------------------------------------------------
// Entry Core
// ------------------------------------------------------------------------------------------------

/// One time-ordered stream of records backed by an entry directory.
///
/// The current write target is tracked as `current_block_id` and resolved
/// through the descriptor's block list on each use, so descriptor
/// mutations can never leave a dangling reference to a moved block.
#[derive(Debug)]
pub struct Entry {
    /// Entry name (the directory name).
    name: String,

    /// Absolute path of the entry directory.
    full_path: PathBuf,

    /// Block sizing limits.
    settings: EntrySettings,

    /// The authoritative metadata; mirrors the `.descriptor` file.
    descriptor: EntryDescriptor,

    /// Id of the tail block, the target of latest-case writes.
    current_block_id: u64,

    /// Physical file operations for this entry directory.
    manager: BlockManager,
}

impl Entry {
    /// Creates a new entry on disk.
    ///
    /// Fails with [`EntryError::Conflict`] if the directory already
    /// exists. Persists the settings, pre-allocates the first block file,
    /// and writes the initial descriptor (one empty block with id 0).
    pub fn create(options: EntryOptions) -> Result<Self, EntryError> {
        let full_path = options.path.join(&options.name);
        if full_path.exists() {
            return Err(EntryError::Conflict(format!(
                "entry directory {} already exists",
                full_path.display()
            )));
        }

        fs::create_dir_all(&full_path)?;

        let manager = BlockManager::new(&full_path);
        manager.save_settings(&options.settings)?;

        let descriptor = EntryDescriptor::new(now_micros());
        manager.allocate_block(0, options.settings.max_block_size)?;
        manager.save_descriptor(&descriptor)?;

        info!(entry = %options.name, path = %full_path.display(), "entry created");

        Ok(Self {
            name: options.name,
            full_path,
            settings: options.settings,
            descriptor,
            current_block_id: 0,
            manager,
        })
    }

    /// Restores an entry from its directory.
    ///
    /// Loads settings and descriptor, validates descriptor invariants,
    /// and removes orphan block files that no descriptor entry
    /// references (left behind by a crash between block allocation and
    /// descriptor save).
    pub fn restore(full_path: impl Into<PathBuf>) -> Result<Self, EntryError> {
        let full_path: PathBuf = full_path.into();
        let name = full_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                EntryError::Corrupt(format!("invalid entry path {}", full_path.display()))
            })?
            .to_string();

        let manager = BlockManager::new(&full_path);
        let settings = manager.load_settings()?;
        let descriptor = manager.load_descriptor()?;

        validate_descriptor(&descriptor)?;

        let current_block_id = descriptor
            .blocks
            .last()
            .map(|b| b.id)
            .ok_or_else(|| EntryError::Corrupt("descriptor has no blocks".into()))?;

        let entry = Self {
            name,
            full_path,
            settings,
            descriptor,
            current_block_id,
            manager,
        };
        entry.remove_orphan_blocks()?;

        debug!(
            entry = %entry.name,
            blocks = entry.descriptor.blocks.len(),
            bytes = entry.descriptor.size,
            "entry restored"
        );
        Ok(entry)
    }

    /// Entry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path of the entry directory.
    pub fn path(&self) -> &Path {
        &self.full_path
    }

    /// Current block sizing limits.
    pub fn settings(&self) -> EntrySettings {
        self.settings
    }

    /// Replaces the entry settings and persists them.
    ///
    /// New limits apply to blocks started afterwards; existing block
    /// files keep their allocated size.
    pub fn update_settings(&mut self, settings: EntrySettings) -> Result<(), EntryError> {
        self.manager.save_settings(&settings)?;
        self.settings = settings;
        info!(entry = %self.name, ?settings, "entry settings updated");
        Ok(())
    }

    // --------------------------------------------------------------------
    // Write path
    // --------------------------------------------------------------------

    /// Writes a record with the given timestamp.
    ///
    /// The timestamp must be unique within the entry; a duplicate is
    /// rejected with [`EntryError::Conflict`]. On success the record is
    /// durable: the descriptor referencing it has been atomically renamed
    /// into place.
    pub fn write(&mut self, blob: Vec<u8>, ts: i64, labels: Vec<Label>) -> Result<(), EntryError> {
        let kind = self.classify(ts)?;

        // A latest-case timestamp is strictly newer than everything
        // stored, and a belated-first one strictly older, so only a
        // belated write can collide with an existing record.
        if let WriteKind::Belated(index) = kind
            && self.descriptor.blocks[index]
                .records
                .iter()
                .any(|r| r.timestamp == ts)
        {
            return Err(EntryError::Conflict(format!(
                "record with timestamp {ts} already exists"
            )));
        }

        let frame_bytes = RecordFrame { blob, labels }.to_bytes()?;
        let data_len = frame_bytes.len() as u64;

        let target_index = match kind {
            WriteKind::Latest => {
                let index = self.current_block_index()?;
                if self.block_is_full(index, data_len) {
                    self.start_next_block()?;
                    self.current_block_index()?
                } else {
                    index
                }
            }
            WriteKind::BelatedFirst => 0,
            WriteKind::Belated(index) => index,
        };

        trace!(
            entry = %self.name,
            ts,
            ?kind,
            block = self.descriptor.blocks[target_index].id,
            len = data_len,
            "writing record"
        );

        // Append first: a failed append must leave the descriptor
        // untouched in memory and on disk.
        let offset = self.descriptor.blocks[target_index].size;
        let block_id = self.descriptor.blocks[target_index].id;
        let (begin, end) = self.manager.append_record(block_id, offset, &frame_bytes)?;

        let block = &mut self.descriptor.blocks[target_index];
        if block.begin_time.is_none() {
            block.begin_time = Some(ts);
            if target_index == 0 {
                self.descriptor.oldest_record_time = Some(ts);
            }
        }

        block.records.push(Record {
            timestamp: ts,
            begin,
            end,
        });
        block.size += data_len;
        self.descriptor.size += data_len;

        match kind {
            WriteKind::Latest => {
                self.descriptor.blocks[target_index].latest_record_time = Some(ts);
                self.descriptor.latest_record_time = Some(ts);
            }
            WriteKind::BelatedFirst => {
                self.descriptor.blocks[target_index].begin_time = Some(ts);
                self.descriptor.oldest_record_time = Some(ts);
            }
            WriteKind::Belated(_) => {}
        }

        self.save_descriptor_or_rollback()
    }

    // --------------------------------------------------------------------
    // Read path
    // --------------------------------------------------------------------

    /// Reads the record with exactly the given timestamp.
    pub fn read(&self, ts: i64) -> Result<RecordFrame, EntryError> {
        let (Some(oldest), Some(latest)) = (
            self.descriptor.oldest_record_time,
            self.descriptor.latest_record_time,
        ) else {
            return Err(EntryError::NotFound(format!(
                "no record for timestamp {ts}"
            )));
        };

        if ts < oldest || ts > latest {
            return Err(EntryError::NotFound(format!(
                "no record for timestamp {ts}"
            )));
        }

        let index = self.find_block(ts).ok_or_else(|| {
            EntryError::Internal(format!("no block covers timestamp {ts}"))
        })?;

        let block = &self.descriptor.blocks[index];
        let record = block
            .records
            .iter()
            .find(|r| r.timestamp == ts)
            .ok_or_else(|| EntryError::NotFound(format!("no record for timestamp {ts}")))?;

        trace!(entry = %self.name, ts, block = block.id, "reading record");

        let bytes = self.manager.read_record(block.id, record.begin, record.end)?;
        Ok(RecordFrame::from_bytes(&bytes)?)
    }

    /// Lists `(timestamp, size)` of records in the half-open interval
    /// `[start, stop)`, ascending by timestamp.
    pub fn list(&self, start: i64, stop: i64) -> Result<Vec<RecordInfo>, EntryError> {
        if start > stop {
            return Err(EntryError::UnprocessableEntity(format!(
                "start timestamp {start} is after stop timestamp {stop}"
            )));
        }

        let (Some(oldest), Some(latest)) = (
            self.descriptor.oldest_record_time,
            self.descriptor.latest_record_time,
        ) else {
            return Err(EntryError::NotFound("entry has no records".into()));
        };

        if stop <= oldest || start > latest {
            return Err(EntryError::NotFound(format!(
                "no records in interval [{start}, {stop})"
            )));
        }

        let clamped_start = start.max(oldest);
        let clamped_stop = stop.min(latest);

        // First block whose interval ends at or after the clamped start,
        // last block whose interval begins at or before the clamped stop.
        // Clamped bounds can land in a gap between blocks, so overlap
        // bounds are used rather than exact containment.
        let blocks = &self.descriptor.blocks;
        let start_index = blocks.partition_point(
            |b| matches!(b.latest_record_time, Some(t) if t < clamped_start),
        );
        let stop_index =
            blocks.partition_point(|b| matches!(b.begin_time, Some(t) if t <= clamped_stop));

        let mut records: Vec<RecordInfo> = blocks[start_index..stop_index]
            .iter()
            .flat_map(|b| b.records.iter())
            .filter(|r| r.timestamp >= start && r.timestamp < stop)
            .map(|r| RecordInfo {
                timestamp: r.timestamp,
                size: r.end - r.begin,
            })
            .collect();

        if records.is_empty() {
            return Err(EntryError::NotFound(format!(
                "no records in interval [{start}, {stop})"
            )));
        }

        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    // --------------------------------------------------------------------
    // Retention
    // --------------------------------------------------------------------

    /// Removes the oldest block and its data file.
    ///
    /// A no-op when only one block exists: the head is also the tail and
    /// removing it would destroy the write target.
    pub fn remove_oldest_block(&mut self) -> Result<(), EntryError> {
        if self.descriptor.blocks.len() <= 1 {
            return Ok(());
        }

        let head = self.descriptor.blocks.remove(0);
        // Missing data file is fine; the descriptor is the source of truth.
        self.manager.remove_block(head.id)?;
        self.descriptor.size -= head.size;

        let new_head = &self.descriptor.blocks[0];
        self.descriptor.oldest_record_time =
            new_head.begin_time.or(new_head.latest_record_time);

        debug!(
            entry = %self.name,
            removed = head.id,
            freed = head.size,
            "oldest block removed"
        );

        self.save_descriptor_or_rollback()
    }

    /// Snapshot of the entry's aggregate state.
    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            block_count: self.descriptor.blocks.len() as u64,
            record_count: self
                .descriptor
                .blocks
                .iter()
                .map(|b| b.records.len() as u64)
                .sum(),
            bytes: self.descriptor.size,
            oldest_record_time: self.descriptor.oldest_record_time,
            latest_record_time: self.descriptor.latest_record_time,
            created_at: self.descriptor.created_at,
        }
    }

    // --------------------------------------------------------------------
    // Internal helpers
    // --------------------------------------------------------------------

    /// Classifies a timestamp against the entry's time bounds.
    fn classify(&self, ts: i64) -> Result<WriteKind, EntryError> {
        let Some(latest) = self.descriptor.latest_record_time else {
            return Ok(WriteKind::Latest);
        };
        if ts > latest {
            return Ok(WriteKind::Latest);
        }

        let oldest = self
            .descriptor
            .oldest_record_time
            .ok_or_else(|| EntryError::Internal("latest time set without oldest".into()))?;
        if ts < oldest {
            debug!(entry = %self.name, ts, "timestamp precedes first record");
            return Ok(WriteKind::BelatedFirst);
        }

        match self.find_block(ts) {
            Some(index) => Ok(WriteKind::Belated(index)),
            None => Err(EntryError::Internal(format!(
                "no proper block for timestamp {ts}"
            ))),
        }
    }

    /// Binary search for the smallest-index block whose closed time
    /// interval contains `ts`. Blocks are ordered by `begin_time`; a
    /// block without one (never written) sorts last and covers nothing.
    ///
    /// Adjacent intervals share their boundary timestamp — a new block
    /// begins where its predecessor's interval ends — so after the
    /// search the candidate walks back while the previous block also
    /// covers `ts`.
    fn find_block(&self, ts: i64) -> Option<usize> {
        let blocks = &self.descriptor.blocks;
        let index = blocks.partition_point(|b| matches!(b.begin_time, Some(t) if t <= ts));
        if index == 0 {
            return None;
        }

        let mut candidate = index - 1;
        if !blocks[candidate].covers(ts) {
            return None;
        }
        while candidate > 0 && blocks[candidate - 1].covers(ts) {
            candidate -= 1;
        }
        Some(candidate)
    }

    /// True when appending `data_len` bytes to block `index` would cross
    /// its byte or record-count limit. A fresh block is never considered
    /// full, so a single record larger than `max_block_size` still lands.
    fn block_is_full(&self, index: usize, data_len: u64) -> bool {
        let block = &self.descriptor.blocks[index];
        !block.is_empty()
            && (block.size + data_len > self.settings.max_block_size
                || block.records.len() as u64 >= self.settings.max_block_records)
    }

    /// Allocates and registers a fresh tail block.
    ///
    /// The new block's interval begins where the previous block's ends,
    /// so every timestamp between the old block's records and the
    /// incoming one stays routable to exactly one block.
    fn start_next_block(&mut self) -> Result<(), EntryError> {
        let previous_index = self.current_block_index()?;
        let chain_time = self.descriptor.blocks[previous_index]
            .latest_record_time
            .ok_or_else(|| {
                EntryError::Internal("rolling over from a block with no records".into())
            })?;

        let next_id = self.current_block_id + 1;
        self.manager
            .allocate_block(next_id, self.settings.max_block_size)?;

        let mut block = Block::new(next_id);
        block.begin_time = Some(chain_time);
        self.descriptor.blocks.push(block);
        self.current_block_id = next_id;

        debug!(entry = %self.name, block = next_id, chain_time, "started next block");
        Ok(())
    }

    /// Resolves `current_block_id` to its index in the block list.
    fn current_block_index(&self) -> Result<usize, EntryError> {
        // The current block is the tail by construction.
        match self.descriptor.blocks.last() {
            Some(block) if block.id == self.current_block_id => {
                Ok(self.descriptor.blocks.len() - 1)
            }
            Some(block) => Err(EntryError::Internal(format!(
                "current block id {} does not match tail block {}",
                self.current_block_id, block.id
            ))),
            None => Err(EntryError::Internal("descriptor has no blocks".into())),
        }
    }

    /// Persists the descriptor; on failure re-reads the on-disk copy so
    /// the in-memory state never diverges from what a restart would see.
    fn save_descriptor_or_rollback(&mut self) -> Result<(), EntryError> {
        match self.manager.save_descriptor(&self.descriptor) {
            Ok(()) => Ok(()),
            Err(save_err) => {
                warn!(entry = %self.name, error = %save_err, "descriptor save failed, rolling back");
                match self.manager.load_descriptor() {
                    Ok(on_disk) => {
                        self.descriptor = on_disk;
                        self.current_block_id =
                            self.descriptor.blocks.last().map(|b| b.id).unwrap_or(0);
                        Err(save_err.into())
                    }
                    Err(reload_err) => Err(EntryError::Internal(format!(
                        "descriptor save failed ({save_err}) and rollback failed ({reload_err})"
                    ))),
                }
            }
        }
    }

    /// Deletes `*.block` files that the descriptor does not reference.
    fn remove_orphan_blocks(&self) -> Result<(), EntryError> {
        let known: HashSet<u64> = self.descriptor.blocks.iter().map(|b| b.id).collect();

        for dir_entry in fs::read_dir(&self.full_path)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("block") {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok());
            if let Some(id) = id
                && !known.contains(&id)
            {
                warn!(entry = %self.name, block = id, "removing orphan block file");
                let _ = fs::remove_file(&path);
            }
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Free helpers
// ------------------------------------------------------------------------------------------------

/// Current wall-clock time in microseconds since the Unix epoch.
///
/// A clock before the epoch maps to 0.
pub(crate) fn now_micros() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_micros() as i64,
        Err(_) => 0,
    }
}

/// Checks the structural invariants a loaded descriptor must satisfy.
fn validate_descriptor(descriptor: &EntryDescriptor) -> Result<(), EntryError> {
    if descriptor.blocks.is_empty() {
        return Err(EntryError::Corrupt("descriptor has no blocks".into()));
    }

    for pair in descriptor.blocks.windows(2) {
        if pair[1].id <= pair[0].id {
            return Err(EntryError::Corrupt(format!(
                "block ids not strictly increasing: {} then {}",
                pair[0].id, pair[1].id
            )));
        }
    }

    let total: u64 = descriptor.blocks.iter().map(|b| b.size).sum();
    if total != descriptor.size {
        return Err(EntryError::Corrupt(format!(
            "descriptor size {} does not match block total {total}",
            descriptor.size
        )));
    }

    let oldest = descriptor
        .blocks
        .iter()
        .filter(|b| !b.is_empty())
        .filter_map(|b| b.begin_time)
        .min();
    if descriptor.oldest_record_time != oldest {
        return Err(EntryError::Corrupt(format!(
            "descriptor oldest time {:?} does not match block minimum {oldest:?}",
            descriptor.oldest_record_time
        )));
    }

    let latest = descriptor
        .blocks
        .iter()
        .filter_map(|b| b.latest_record_time)
        .max();
    if descriptor.latest_record_time != latest {
        return Err(EntryError::Corrupt(format!(
            "descriptor latest time {:?} does not match block maximum {latest:?}",
            descriptor.latest_record_time
        )));
    }

    Ok(())
}
