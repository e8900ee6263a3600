//! Bucket Module
//!
//! A **bucket** is a named collection of entries sharing sizing settings
//! and a retention quota. It dispatches writes and reads by entry name,
//! creates entries lazily on first write, and enforces the FIFO quota by
//! evicting the oldest block across all of its entries.
//!
//! ## Quota enforcement
//!
//! With `quota_type == Fifo`, every successful write is followed by a
//! best-effort eviction loop: while the bucket's total bytes exceed
//! `quota_size`, the entry holding the oldest data (tie-break: largest
//! bytes) gives up its head block. Entries down to their last block are
//! exempt — the sole block is also the write target. If every entry is
//! exempt and usage still exceeds the quota, the write stays durable and
//! [`BucketError::QuotaExceeded`] reports the condition.
//!
//! ## Concurrency
//!
//! The entry map sits behind a reader-writer lock; each entry is handed
//! out as `Arc<Mutex<Entry>>`, so operations serialize per entry and run
//! concurrently across entries. The eviction loop locks one entry at a
//! time and never holds the map lock across entry I/O.

#[cfg(test)]
mod tests;

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::block::{self, BlockError, EntrySettings, Label, META_VERSION, RecordFrame};
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::entry::{Entry, EntryError, EntryOptions, RecordInfo};

/// File name of the bucket settings inside a bucket directory.
pub const BUCKET_SETTINGS_FILENAME: &str = ".settings";

/// Magic bytes of the bucket `.settings` file.
pub const BUCKET_SETTINGS_MAGIC: [u8; 4] = *b"TSBS";

/// Longest accepted bucket or entry name.
const MAX_NAME_LEN: usize = 63;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by bucket operations.
#[derive(Debug, Error)]
pub enum BucketError {
    /// Error originating from an entry.
    #[error("Entry error: {0}")]
    Entry(#[from] EntryError),

    /// Error originating from block-level file operations.
    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Bucket or entry does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate creation or invalid name.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Semantically invalid arguments.
    #[error("Unprocessable: {0}")]
    UnprocessableEntity(String),

    /// Quota exceeded and eviction could not recover.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Settings
// ------------------------------------------------------------------------------------------------

/// Retention policy of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuotaType {
    /// No quota; the bucket grows without bound.
    #[default]
    None,

    /// Total-bytes ceiling enforced by evicting oldest blocks.
    Fifo,
}

/// Bucket-wide settings, persisted as `.settings` in the bucket directory.
///
/// `max_block_size` and `max_block_records` are propagated to entries the
/// bucket creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSettings {
    /// Retention policy.
    pub quota_type: QuotaType,

    /// Total-bytes ceiling for [`QuotaType::Fifo`]; ignored otherwise.
    pub quota_size: u64,

    /// Pre-allocated size of each block data file in bytes.
    pub max_block_size: u64,

    /// Maximum record count per block.
    pub max_block_records: u64,
}

impl Default for BucketSettings {
    fn default() -> Self {
        let entry_defaults = EntrySettings::default();
        Self {
            quota_type: QuotaType::None,
            quota_size: 0,
            max_block_size: entry_defaults.max_block_size,
            max_block_records: entry_defaults.max_block_records,
        }
    }
}

impl BucketSettings {
    /// The entry-level settings a bucket with these settings hands to
    /// entries it creates.
    fn entry_settings(&self) -> EntrySettings {
        EntrySettings {
            max_block_size: self.max_block_size,
            max_block_records: self.max_block_records,
        }
    }
}

/// Snapshot of a bucket's aggregate state returned by [`Bucket::info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    /// Number of entries.
    pub entry_count: u64,

    /// Total number of records across entries.
    pub record_count: u64,

    /// Total bytes of stored record frames across entries.
    pub bytes: u64,

    /// Oldest record timestamp across entries, if any records exist.
    pub oldest_record_time: Option<i64>,

    /// Newest record timestamp across entries, if any records exist.
    pub latest_record_time: Option<i64>,
}

// ------------------------------------------------------------------------------------------------
// Encoding implementations
// ------------------------------------------------------------------------------------------------

impl Encode for QuotaType {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let tag: u8 = match self {
            QuotaType::None => 0,
            QuotaType::Fifo => 1,
        };
        tag.encode_to(buf)
    }
}

impl Decode for QuotaType {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, n) = u8::decode_from(buf)?;
        match tag {
            0 => Ok((QuotaType::None, n)),
            1 => Ok((QuotaType::Fifo, n)),
            other => Err(EncodingError::InvalidTag {
                tag: other,
                type_name: "QuotaType",
            }),
        }
    }
}

impl Encode for BucketSettings {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.quota_type.encode_to(buf)?;
        self.quota_size.encode_to(buf)?;
        self.max_block_size.encode_to(buf)?;
        self.max_block_records.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for BucketSettings {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (quota_type, n) = QuotaType::decode_from(&buf[offset..])?;
        offset += n;
        let (quota_size, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (max_block_size, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (max_block_records, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                quota_type,
                quota_size,
                max_block_size,
                max_block_records,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Bucket Core
// ------------------------------------------------------------------------------------------------

/// A named container of entries sharing settings and a retention quota.
#[derive(Debug)]
pub struct Bucket {
    /// Bucket name (the directory name).
    name: String,

    /// Absolute path of the bucket directory.
    path: PathBuf,

    /// Bucket-wide settings; updated via [`Bucket::set_settings`].
    settings: RwLock<BucketSettings>,

    /// Entries by name. Entries are created lazily on first write.
    entries: RwLock<HashMap<String, Arc<Mutex<Entry>>>>,
}

impl Bucket {
    /// Creates a new bucket directory under `parent` and persists its
    /// settings.
    ///
    /// Fails with [`BucketError::Conflict`] if the directory exists or
    /// the name is invalid.
    pub fn create(
        parent: impl AsRef<Path>,
        name: &str,
        settings: BucketSettings,
    ) -> Result<Self, BucketError> {
        validate_name(name).map_err(BucketError::UnprocessableEntity)?;

        let path = parent.as_ref().join(name);
        if path.exists() {
            return Err(BucketError::Conflict(format!(
                "bucket directory {} already exists",
                path.display()
            )));
        }

        fs::create_dir_all(&path)?;
        save_settings(&path, &settings)?;

        info!(bucket = name, path = %path.display(), "bucket created");

        Ok(Self {
            name: name.to_string(),
            path,
            settings: RwLock::new(settings),
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// Restores a bucket from its directory, loading every entry inside.
    ///
    /// An entry that fails to load is logged and skipped; the rest of the
    /// bucket stays available.
    pub fn restore(path: impl Into<PathBuf>) -> Result<Self, BucketError> {
        let path: PathBuf = path.into();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                BucketError::Internal(format!("invalid bucket path {}", path.display()))
            })?
            .to_string();

        let settings = load_settings(&path)?;

        let mut entries = HashMap::new();
        for dir_entry in fs::read_dir(&path)? {
            let entry_path = dir_entry?.path();
            if !entry_path.is_dir() {
                continue;
            }
            match Entry::restore(&entry_path) {
                Ok(entry) => {
                    entries.insert(entry.name().to_string(), Arc::new(Mutex::new(entry)));
                }
                Err(e) => {
                    error!(
                        bucket = %name,
                        path = %entry_path.display(),
                        error = %e,
                        "failed to restore entry, skipping"
                    );
                }
            }
        }

        debug!(bucket = %name, entries = entries.len(), "bucket restored");

        Ok(Self {
            name,
            path,
            settings: RwLock::new(settings),
            entries: RwLock::new(entries),
        })
    }

    /// Bucket name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path of the bucket directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current bucket settings.
    pub fn settings(&self) -> Result<BucketSettings, BucketError> {
        Ok(*self.read_settings()?)
    }

    /// Replaces the bucket settings, persists them, and propagates the
    /// block limits to existing entries.
    pub fn set_settings(&self, settings: BucketSettings) -> Result<(), BucketError> {
        save_settings(&self.path, &settings)?;
        *self
            .settings
            .write()
            .map_err(|_| BucketError::Internal("settings lock poisoned".into()))? = settings;

        for (_, handle) in self.snapshot_entries()? {
            let mut entry = lock_entry(&handle)?;
            entry.update_settings(settings.entry_settings())?;
        }

        info!(bucket = %self.name, ?settings, "bucket settings updated");
        Ok(())
    }

    // --------------------------------------------------------------------
    // Record operations
    // --------------------------------------------------------------------

    /// Writes a record into the named entry, creating the entry on first
    /// use, then enforces the bucket quota.
    ///
    /// Returns [`BucketError::QuotaExceeded`] when eviction could not
    /// bring usage back under the quota; the record itself is durable
    /// either way.
    pub fn write(
        &self,
        entry_name: &str,
        blob: Vec<u8>,
        ts: i64,
        labels: Vec<Label>,
    ) -> Result<(), BucketError> {
        let handle = self.get_or_create_entry(entry_name)?;
        {
            let mut entry = lock_entry(&handle)?;
            entry.write(blob, ts, labels)?;
        }
        self.enforce_quota()
    }

    /// Reads the record with exactly the given timestamp from the named
    /// entry.
    pub fn read(&self, entry_name: &str, ts: i64) -> Result<RecordFrame, BucketError> {
        let handle = self.get_entry(entry_name)?;
        let entry = lock_entry(&handle)?;
        Ok(entry.read(ts)?)
    }

    /// Lists records of the named entry in `[start, stop)`.
    pub fn list(
        &self,
        entry_name: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<RecordInfo>, BucketError> {
        let handle = self.get_entry(entry_name)?;
        let entry = lock_entry(&handle)?;
        Ok(entry.list(start, stop)?)
    }

    /// Removes the named entry: its in-memory handle and its directory.
    pub fn remove_entry(&self, entry_name: &str) -> Result<(), BucketError> {
        let removed = self
            .entries
            .write()
            .map_err(|_| BucketError::Internal("entry map lock poisoned".into()))?
            .remove(entry_name);

        let Some(handle) = removed else {
            return Err(BucketError::NotFound(format!(
                "entry '{entry_name}' not found in bucket '{}'",
                self.name
            )));
        };

        // Hold the entry lock while deleting so an in-flight operation
        // finishes before the files disappear underneath it.
        let entry = lock_entry(&handle)?;
        fs::remove_dir_all(entry.path())?;

        info!(bucket = %self.name, entry = entry_name, "entry removed");
        Ok(())
    }

    /// Names of all entries, sorted.
    pub fn entry_names(&self) -> Result<Vec<String>, BucketError> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .map_err(|_| BucketError::Internal("entry map lock poisoned".into()))?
            .keys()
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    /// Snapshot of the bucket's aggregate state.
    pub fn info(&self) -> Result<BucketInfo, BucketError> {
        let mut info = BucketInfo {
            entry_count: 0,
            record_count: 0,
            bytes: 0,
            oldest_record_time: None,
            latest_record_time: None,
        };

        for (_, handle) in self.snapshot_entries()? {
            let entry = lock_entry(&handle)?;
            let entry_info = entry.info();
            info.entry_count += 1;
            info.record_count += entry_info.record_count;
            info.bytes += entry_info.bytes;
            info.oldest_record_time = merge_min(info.oldest_record_time, entry_info.oldest_record_time);
            info.latest_record_time = merge_max(info.latest_record_time, entry_info.latest_record_time);
        }

        Ok(info)
    }

    // --------------------------------------------------------------------
    // Internal helpers
    // --------------------------------------------------------------------

    /// Looks up an existing entry handle.
    fn get_entry(&self, entry_name: &str) -> Result<Arc<Mutex<Entry>>, BucketError> {
        self.entries
            .read()
            .map_err(|_| BucketError::Internal("entry map lock poisoned".into()))?
            .get(entry_name)
            .cloned()
            .ok_or_else(|| {
                BucketError::NotFound(format!(
                    "entry '{entry_name}' not found in bucket '{}'",
                    self.name
                ))
            })
    }

    /// Looks up an entry handle, creating the entry on disk if it does
    /// not exist yet.
    fn get_or_create_entry(&self, entry_name: &str) -> Result<Arc<Mutex<Entry>>, BucketError> {
        if let Ok(handle) = self.get_entry(entry_name) {
            return Ok(handle);
        }

        validate_name(entry_name).map_err(BucketError::UnprocessableEntity)?;

        let mut entries = self
            .entries
            .write()
            .map_err(|_| BucketError::Internal("entry map lock poisoned".into()))?;

        // A concurrent writer can win the race between the read check
        // and this write lock.
        if let Some(handle) = entries.get(entry_name) {
            return Ok(Arc::clone(handle));
        }

        let settings = *self.read_settings()?;
        let entry = Entry::create(EntryOptions {
            name: entry_name.to_string(),
            path: self.path.clone(),
            settings: settings.entry_settings(),
        })?;

        let handle = Arc::new(Mutex::new(entry));
        entries.insert(entry_name.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Evicts oldest blocks until usage fits the FIFO quota.
    fn enforce_quota(&self) -> Result<(), BucketError> {
        let settings = *self.read_settings()?;
        if settings.quota_type != QuotaType::Fifo {
            return Ok(());
        }

        loop {
            let entries = self.snapshot_entries()?;

            let mut total: u64 = 0;
            // Best candidate: oldest data first, then largest bytes.
            let mut candidate: Option<(Arc<Mutex<Entry>>, i64, u64)> = None;

            for (_, handle) in &entries {
                let entry = lock_entry(handle)?;
                let entry_info = entry.info();
                total += entry_info.bytes;

                if entry_info.block_count <= 1 {
                    continue;
                }
                let Some(oldest) = entry_info.oldest_record_time else {
                    continue;
                };

                let better = match &candidate {
                    None => true,
                    Some((_, best_oldest, best_bytes)) => {
                        oldest < *best_oldest
                            || (oldest == *best_oldest && entry_info.bytes > *best_bytes)
                    }
                };
                if better {
                    candidate = Some((Arc::clone(handle), oldest, entry_info.bytes));
                }
            }

            if total <= settings.quota_size {
                return Ok(());
            }

            let Some((handle, oldest, _)) = candidate else {
                warn!(
                    bucket = %self.name,
                    total,
                    quota = settings.quota_size,
                    "quota exceeded and no evictable block remains"
                );
                return Err(BucketError::QuotaExceeded(format!(
                    "bucket '{}' holds {total} bytes over a {} byte quota",
                    self.name, settings.quota_size
                )));
            };

            debug!(bucket = %self.name, total, oldest, "evicting oldest block");
            let mut entry = lock_entry(&handle)?;
            entry.remove_oldest_block()?;
        }
    }

    /// Clones the entry map into a plain vector so callers can iterate
    /// without holding the map lock across entry I/O.
    fn snapshot_entries(&self) -> Result<Vec<(String, Arc<Mutex<Entry>>)>, BucketError> {
        Ok(self
            .entries
            .read()
            .map_err(|_| BucketError::Internal("entry map lock poisoned".into()))?
            .iter()
            .map(|(name, handle)| (name.clone(), Arc::clone(handle)))
            .collect())
    }

    fn read_settings(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BucketSettings>, BucketError> {
        self.settings
            .read()
            .map_err(|_| BucketError::Internal("settings lock poisoned".into()))
    }
}

// ------------------------------------------------------------------------------------------------
// Free helpers
// ------------------------------------------------------------------------------------------------

/// Locks one entry, mapping a poisoned mutex to
/// [`BucketError::Internal`].
fn lock_entry(handle: &Arc<Mutex<Entry>>) -> Result<std::sync::MutexGuard<'_, Entry>, BucketError> {
    handle
        .lock()
        .map_err(|_| BucketError::Internal("entry lock poisoned".into()))
}

/// Validates a bucket or entry name: `[A-Za-z0-9_-]{1,63}`.
pub(crate) fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(format!(
            "name '{name}' must be 1..={MAX_NAME_LEN} characters"
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(format!(
            "name '{name}' may only contain letters, digits, '_' and '-'"
        ));
    }
    Ok(())
}

/// Persists bucket settings crash-safely.
fn save_settings(path: &Path, settings: &BucketSettings) -> Result<(), BucketError> {
    let payload = encoding::encode_to_vec(settings)?;
    block::write_meta_file(
        &path.join(BUCKET_SETTINGS_FILENAME),
        BUCKET_SETTINGS_MAGIC,
        META_VERSION,
        &payload,
    )?;
    Ok(())
}

/// Loads and validates bucket settings.
fn load_settings(path: &Path) -> Result<BucketSettings, BucketError> {
    let payload = block::read_meta_file(
        &path.join(BUCKET_SETTINGS_FILENAME),
        BUCKET_SETTINGS_MAGIC,
        META_VERSION,
    )?;
    let (settings, _) = encoding::decode_from_slice::<BucketSettings>(&payload)?;
    Ok(settings)
}

fn merge_min(current: Option<i64>, candidate: Option<i64>) -> Option<i64> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn merge_max(current: Option<i64>, candidate: Option<i64>) -> Option<i64> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
