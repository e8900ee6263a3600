//! API Façade Module
//!
//! The HTTP layer proper (routing, TLS, body streaming) lives outside
//! this crate. This module fixes the boundary: [`Api`] exposes one method
//! per endpoint, each a thin mapping onto the core, and [`status_code`]
//! translates the error taxonomy into HTTP status codes.
//!
//! | Endpoint                                  | Method                  |
//! |-------------------------------------------|-------------------------|
//! | `HEAD /alive`                             | [`Api::alive`]          |
//! | `GET /info`                               | [`Api::info`]           |
//! | `GET /list`                               | [`Api::list`]           |
//! | `POST /b/{bucket}`                        | [`Api::create_bucket`]  |
//! | `DELETE /b/{bucket}`                      | [`Api::remove_bucket`]  |
//! | `GET /b/{bucket}`                         | [`Api::bucket_info`]    |
//! | `POST /b/{bucket}/{entry}?ts=`            | [`Api::write_record`]   |
//! | `GET /b/{bucket}/{entry}?ts=`             | [`Api::read_record`]    |
//! | `GET /b/{bucket}/{entry}/list?start=&stop=` | [`Api::list_records`] |

#[cfg(test)]
mod tests;

use std::sync::Arc;

use crate::asset::{AssetError, AssetManager};
use crate::auth::{AuthError, TokenRepository};
use crate::bucket::{BucketError, BucketInfo, BucketSettings};
use crate::entry::{EntryError, RecordInfo};
use crate::storage::{BucketSummary, Storage, StorageError, StorageInfo};

// ------------------------------------------------------------------------------------------------
// Components
// ------------------------------------------------------------------------------------------------

/// The collaborators the serving layer wires together.
pub struct Components {
    /// The storage core.
    pub storage: Arc<Storage>,

    /// Token repository backing authentication.
    pub token_repo: Arc<dyn TokenRepository>,

    /// Static-asset provider for the web console.
    pub assets: Arc<dyn AssetManager>,
}

// ------------------------------------------------------------------------------------------------
// Api
// ------------------------------------------------------------------------------------------------

/// Maps endpoint requests onto core calls.
pub struct Api {
    components: Components,
}

impl Api {
    /// Creates the façade over the given components.
    pub fn new(components: Components) -> Self {
        Self { components }
    }

    /// Checks a presented token value against the repository.
    pub fn authorize(&self, token: Option<&str>) -> Result<(), AuthError> {
        self.components.token_repo.validate(token.unwrap_or(""))
    }

    /// Reads a static asset for the console.
    pub fn asset(&self, relative_path: &str) -> Result<Vec<u8>, AssetError> {
        self.components.assets.read(relative_path)
    }

    /// `HEAD /alive` — always succeeds.
    pub fn alive(&self) -> u16 {
        200
    }

    /// `GET /info`
    pub fn info(&self) -> Result<StorageInfo, StorageError> {
        self.components.storage.info()
    }

    /// `GET /list`
    pub fn list(&self) -> Result<Vec<BucketSummary>, StorageError> {
        self.components.storage.list()
    }

    /// `POST /b/{bucket}`
    pub fn create_bucket(&self, name: &str, settings: BucketSettings) -> Result<(), StorageError> {
        self.components.storage.create_bucket(name, settings)?;
        Ok(())
    }

    /// `DELETE /b/{bucket}`
    pub fn remove_bucket(&self, name: &str) -> Result<(), StorageError> {
        self.components.storage.remove_bucket(name)
    }

    /// `GET /b/{bucket}`
    pub fn bucket_info(&self, name: &str) -> Result<BucketInfo, StorageError> {
        let bucket = self.components.storage.get_bucket(name)?;
        Ok(bucket.info()?)
    }

    /// `POST /b/{bucket}/{entry}?ts=<µs>` with the blob as request body.
    pub fn write_record(
        &self,
        bucket: &str,
        entry: &str,
        ts: i64,
        blob: Vec<u8>,
    ) -> Result<(), StorageError> {
        let bucket = self.components.storage.get_bucket(bucket)?;
        bucket.write(entry, blob, ts, Vec::new())?;
        Ok(())
    }

    /// `GET /b/{bucket}/{entry}?ts=<µs>` — returns the blob.
    pub fn read_record(&self, bucket: &str, entry: &str, ts: i64) -> Result<Vec<u8>, StorageError> {
        let bucket = self.components.storage.get_bucket(bucket)?;
        let frame = bucket.read(entry, ts)?;
        Ok(frame.blob)
    }

    /// `GET /b/{bucket}/{entry}/list?start=<µs>&stop=<µs>`
    pub fn list_records(
        &self,
        bucket: &str,
        entry: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<RecordInfo>, StorageError> {
        let bucket = self.components.storage.get_bucket(bucket)?;
        Ok(bucket.list(entry, start, stop)?)
    }
}

// ------------------------------------------------------------------------------------------------
// Status code mapping
// ------------------------------------------------------------------------------------------------

/// Maps a core error to its HTTP status code.
pub fn status_code(err: &StorageError) -> u16 {
    match err {
        StorageError::NotFound(_) => 404,
        StorageError::Conflict(_) => 409,
        StorageError::UnprocessableEntity(_) => 422,
        StorageError::Bucket(e) => bucket_status_code(e),
        StorageError::Io(_) | StorageError::Internal(_) => 500,
    }
}

/// Maps a bucket error to its HTTP status code.
fn bucket_status_code(err: &BucketError) -> u16 {
    match err {
        BucketError::NotFound(_) => 404,
        BucketError::Conflict(_) => 409,
        BucketError::UnprocessableEntity(_) => 422,
        BucketError::QuotaExceeded(_) => 507,
        BucketError::Entry(e) => entry_status_code(e),
        BucketError::Block(_)
        | BucketError::Io(_)
        | BucketError::Encoding(_)
        | BucketError::Internal(_) => 500,
    }
}

/// Maps an entry error to its HTTP status code.
fn entry_status_code(err: &EntryError) -> u16 {
    match err {
        EntryError::NotFound(_) => 404,
        EntryError::Conflict(_) => 409,
        EntryError::UnprocessableEntity(_) => 422,
        EntryError::Block(_)
        | EntryError::Io(_)
        | EntryError::Corrupt(_)
        | EntryError::Internal(_) => 500,
    }
}
