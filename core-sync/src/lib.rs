//! # Sync Engine & Job Runner
//!
//! Resumable mirroring of remote file metadata, driven by a persistent job
//! queue.
//!
//! ## Components
//!
//! - **Sync Engine** (`engine`): pulls a paginated listing page by page,
//!   committing records before the checkpoint that follows them
//! - **Handlers** (`handler`): job-type registry; `metadata_sync` runs the engine
//! - **Job Runner** (`runner`): polls the store, executes jobs one at a time,
//!   records DONE/FAILED/DEAD and reclaims jobs orphaned by a crash
//!
//! All durable state lives in [`core_store::DurableStore`]; nothing here
//! survives a restart except what is re-read from it.

pub mod engine;
pub mod error;
pub mod handler;
pub mod runner;

pub use engine::{
    request_full_resync, MetadataSyncEngine, SyncReport, CHECKPOINT_KEY, DEFAULT_PAGE_SIZE,
};
pub use error::{Result, SyncError};
pub use handler::{HandlerRegistry, JobHandler, MetadataSyncHandler, METADATA_SYNC_JOB_TYPE};
pub use runner::{JobRunner, DEFAULT_BATCH_SIZE, DEFAULT_POLL_INTERVAL};
