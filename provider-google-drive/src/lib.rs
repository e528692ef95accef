//! # Google Drive Provider
//!
//! Implements [`MetadataSource`](bridge_traits::MetadataSource) on top of the
//! Drive API v3 `files.list` endpoint.
//!
//! Only metadata is read (`drive.metadata.readonly` is sufficient). Rate
//! limiting and server errors are retried a few times in place with backoff
//! and, if they persist, surface as transient errors so the job can be retried
//! later. Authorization and request errors are permanent.

pub mod connector;
pub mod error;
pub mod types;

pub use connector::GoogleDriveConnector;
pub use error::{GoogleDriveError, Result};
