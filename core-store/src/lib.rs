//! # Core Store
//!
//! SQLite-backed persistence for the sync daemon: mirrored file metadata,
//! pagination checkpoints and the job queue.
//!
//! All state that survives a restart lives here. The sync engine and the job
//! runner re-read everything they need from the [`DurableStore`] and hold no
//! state of their own.

pub mod db;
pub mod error;
pub mod models;
pub mod store;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{Result, StoreError};
pub use models::{
    FileRecord, Job, JobId, JobStatus, JobStatusCounts, RecoveryOutcome, DEFAULT_MAX_ATTEMPTS,
    EXHAUSTED_ERROR,
};
pub use store::{DurableStore, SqliteStore, INTERRUPTED_ERROR};
