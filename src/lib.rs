//! # TempusDB
//!
//! An embeddable, persistent **time-series blob store**. Opaque binary
//! records tagged with microsecond timestamps are grouped into named
//! buckets with retention quotas and laid out on disk as fixed-size,
//! pre-allocated block files described by a crash-safe descriptor.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       Storage                           │
//! │   bucket registry · startup scan · aggregate info       │
//! │  ┌───────────────────────────────────────────────────┐  │
//! │  │                    Bucket                         │  │
//! │  │   entry map · settings · FIFO quota eviction      │  │
//! │  │  ┌─────────────────────────────────────────────┐  │  │
//! │  │  │                  Entry                      │  │  │
//! │  │  │   descriptor · write classification ·       │  │  │
//! │  │  │   timestamp navigation · range listings     │  │  │
//! │  │  │  ┌───────────────────────────────────────┐  │  │  │
//! │  │  │  │            BlockManager               │  │  │  │
//! │  │  │  │   pre-allocated block files · frames  │  │  │  │
//! │  │  │  │   atomic descriptor saves             │  │  │  │
//! │  │  │  └───────────────────────────────────────┘  │  │  │
//! │  │  └─────────────────────────────────────────────┘  │  │
//! │  └───────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`storage`] | Process-wide bucket registry |
//! | [`bucket`] | Named entry collections with shared quota and settings |
//! | [`entry`] | One time-ordered record stream over block files |
//! | [`block`] | Physical layer: block files, record frames, metadata I/O |
//! | [`encoding`] | Deterministic binary wire format for persisted artifacts |
//! | [`config`] | `TS_*` environment configuration |
//! | [`api`] | Endpoint façade and error → HTTP status mapping |
//! | [`auth`] | Token repository contract |
//! | [`asset`] | Static-asset provider contract |
//!
//! ## Key properties
//!
//! - **Crash-safe metadata** — every descriptor save writes a temporary
//!   sibling and atomically renames it into place; a torn descriptor is
//!   never observable.
//! - **Pre-allocated blocks** — block files are sparsely allocated to
//!   their full size up front; record bytes land inside the reserved
//!   region and become visible only once the descriptor references them.
//! - **Out-of-order writes** — belated timestamps are routed to the block
//!   whose time interval covers them via binary search; timestamps
//!   preceding everything stored extend the head block downwards.
//! - **Unique timestamps** — a duplicate timestamp within an entry is
//!   rejected as a conflict.
//! - **FIFO retention** — buckets with a byte quota evict the oldest
//!   block across their entries after each write.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tempusdb::bucket::BucketSettings;
//! use tempusdb::storage::Storage;
//!
//! let storage = Storage::open("/tmp/tempusdb")?;
//! let bucket = storage.create_bucket("sensors", BucketSettings::default())?;
//!
//! // Write a record with a microsecond timestamp.
//! bucket.write("camera-1", b"frame bytes".to_vec(), 1_700_000_000_000_000, Vec::new())?;
//!
//! // Point lookup by timestamp.
//! let frame = bucket.read("camera-1", 1_700_000_000_000_000)?;
//! assert_eq!(frame.blob, b"frame bytes");
//!
//! // Range listing over [start, stop).
//! let records = bucket.list("camera-1", 0, i64::MAX)?;
//! assert_eq!(records.len(), 1);
//! # Ok::<(), tempusdb::storage::StorageError>(())
//! ```

pub mod api;
pub mod asset;
pub mod auth;
pub mod block;
pub mod bucket;
pub mod config;
pub mod encoding;
pub mod entry;
pub mod storage;
