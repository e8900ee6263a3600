//! Storage Module
//!
//! `Storage` is the process-wide registry of buckets rooted at a single
//! data directory. It constructs and removes buckets, persists their
//! settings, and surfaces aggregate information.
//!
//! ## Startup
//!
//! [`Storage::open`] scans the data directory for bucket directories and
//! restores each one. A bucket (or an entry inside one) that fails to
//! load is logged and skipped; startup never aborts because of a single
//! damaged member.
//!
//! ## Concurrency
//!
//! The bucket map sits behind a reader-writer lock: create and remove
//! take the writer side, lookups take the reader side. Buckets are handed
//! out as `Arc<Bucket>` so callers operate on them without holding the
//! map lock.

#[cfg(test)]
mod tests;

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::Instant,
};

use thiserror::Error;
use tracing::{debug, error, info};

use crate::bucket::{Bucket, BucketError, BucketInfo, BucketSettings, validate_name};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error originating from a bucket.
    #[error("Bucket error: {0}")]
    Bucket(#[from] BucketError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Bucket does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bucket already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Semantically invalid arguments.
    #[error("Unprocessable: {0}")]
    UnprocessableEntity(String),

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Public data types
// ------------------------------------------------------------------------------------------------

/// Process-wide totals returned by [`Storage::info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInfo {
    /// Number of buckets.
    pub bucket_count: u64,

    /// Number of entries across all buckets.
    pub entry_count: u64,

    /// Total bytes of stored record frames across all buckets.
    pub bytes: u64,

    /// Seconds since [`Storage::open`] returned.
    pub uptime_secs: u64,
}

/// One element of a [`Storage::list`] result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSummary {
    /// Bucket name.
    pub name: String,

    /// Aggregate bucket state.
    pub info: BucketInfo,
}

// ------------------------------------------------------------------------------------------------
// Storage Core
// ------------------------------------------------------------------------------------------------

/// The process-wide registry of buckets.
#[derive(Debug)]
pub struct Storage {
    /// Root data directory.
    data_path: PathBuf,

    /// Buckets by name.
    buckets: RwLock<HashMap<String, Arc<Bucket>>>,

    /// Set when the storage finished opening; drives uptime reporting.
    started_at: Instant,
}

impl Storage {
    /// Opens the storage rooted at `data_path`, creating the directory if
    /// missing and restoring every bucket found inside.
    pub fn open(data_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let data_path: PathBuf = data_path.into();
        fs::create_dir_all(&data_path)?;

        let mut buckets = HashMap::new();
        for dir_entry in fs::read_dir(&data_path)? {
            let path = dir_entry?.path();
            if !path.is_dir() {
                continue;
            }
            match Bucket::restore(&path) {
                Ok(bucket) => {
                    debug!(bucket = bucket.name(), "bucket loaded");
                    buckets.insert(bucket.name().to_string(), Arc::new(bucket));
                }
                Err(e) => {
                    error!(
                        path = %path.display(),
                        error = %e,
                        "failed to restore bucket, skipping"
                    );
                }
            }
        }

        info!(
            path = %data_path.display(),
            buckets = buckets.len(),
            "storage opened"
        );

        Ok(Self {
            data_path,
            buckets: RwLock::new(buckets),
            started_at: Instant::now(),
        })
    }

    /// Root data directory.
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Creates a bucket.
    ///
    /// Fails with [`StorageError::Conflict`] if the name is taken and
    /// [`StorageError::UnprocessableEntity`] if the name is invalid.
    pub fn create_bucket(
        &self,
        name: &str,
        settings: BucketSettings,
    ) -> Result<Arc<Bucket>, StorageError> {
        validate_name(name).map_err(StorageError::UnprocessableEntity)?;

        let mut buckets = self.write_buckets()?;
        if buckets.contains_key(name) {
            return Err(StorageError::Conflict(format!(
                "bucket '{name}' already exists"
            )));
        }

        let bucket = Arc::new(Bucket::create(&self.data_path, name, settings)?);
        buckets.insert(name.to_string(), Arc::clone(&bucket));
        Ok(bucket)
    }

    /// Looks up a bucket by name.
    pub fn get_bucket(&self, name: &str) -> Result<Arc<Bucket>, StorageError> {
        self.read_buckets()?
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("bucket '{name}' not found")))
    }

    /// Removes a bucket: its in-memory handle and its directory tree,
    /// entries included.
    pub fn remove_bucket(&self, name: &str) -> Result<(), StorageError> {
        let removed = self.write_buckets()?.remove(name);
        let Some(bucket) = removed else {
            return Err(StorageError::NotFound(format!("bucket '{name}' not found")));
        };

        fs::remove_dir_all(bucket.path())?;
        info!(bucket = name, "bucket removed");
        Ok(())
    }

    /// Process-wide totals.
    pub fn info(&self) -> Result<StorageInfo, StorageError> {
        let buckets = self.snapshot_buckets()?;

        let mut info = StorageInfo {
            bucket_count: buckets.len() as u64,
            entry_count: 0,
            bytes: 0,
            uptime_secs: self.started_at.elapsed().as_secs(),
        };

        for bucket in buckets {
            let bucket_info = bucket.info()?;
            info.entry_count += bucket_info.entry_count;
            info.bytes += bucket_info.bytes;
        }

        Ok(info)
    }

    /// Per-bucket summaries, sorted by bucket name.
    pub fn list(&self) -> Result<Vec<BucketSummary>, StorageError> {
        let mut summaries = Vec::new();
        for bucket in self.snapshot_buckets()? {
            summaries.push(BucketSummary {
                name: bucket.name().to_string(),
                info: bucket.info()?,
            });
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    // --------------------------------------------------------------------
    // Internal helpers
    // --------------------------------------------------------------------

    fn read_buckets(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Bucket>>>, StorageError> {
        self.buckets
            .read()
            .map_err(|_| StorageError::Internal("bucket map lock poisoned".into()))
    }

    fn write_buckets(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Bucket>>>, StorageError> {
        self.buckets
            .write()
            .map_err(|_| StorageError::Internal("bucket map lock poisoned".into()))
    }

    /// Clones the bucket handles so callers can iterate without holding
    /// the map lock across bucket I/O.
    fn snapshot_buckets(&self) -> Result<Vec<Arc<Bucket>>, StorageError> {
        Ok(self.read_buckets()?.values().cloned().collect())
    }
}
