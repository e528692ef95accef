//! # Host Bridge Traits
//!
//! Capability traits the sync core is written against, with one shared error
//! type.
//!
//! - [`MetadataSource`](source::MetadataSource) - paginated remote metadata listing
//! - [`HttpClient`](http::HttpClient) - async HTTP used by remote providers
//! - [`Clock`](time::Clock) - time source for persisted timestamps
//! - [`LoggerSink`](time::LoggerSink) - forwards structured logs to a host pipeline
//!
//! Every error is a [`BridgeError`](error::BridgeError). Providers must keep
//! the transient/permanent distinction intact, since the job runner decides
//! retry behaviour from it.

pub mod error;
pub mod http;
pub mod source;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpRequest, HttpResponse, RetryPolicy};
pub use source::{MetadataPage, MetadataSource, RemoteFileMetadata};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
