//! # Desktop Bridge Implementations
//!
//! Desktop adapters for the bridge traits: the `reqwest`-backed
//! [`ReqwestHttpClient`] used by remote metadata providers, and
//! [`JsonLinesLogSink`] for persisting daemon logs.
//!
//! ```ignore
//! use bridge_desktop::ReqwestHttpClient;
//! use provider_google_drive::GoogleDriveConnector;
//!
//! let http = Arc::new(ReqwestHttpClient::new()?);
//! let drive = GoogleDriveConnector::new(http, token);
//! ```

mod http;
mod log_file;

pub use http::ReqwestHttpClient;
pub use log_file::JsonLinesLogSink;
