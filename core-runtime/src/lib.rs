//! # Core Runtime
//!
//! Process-level infrastructure shared by the sync daemon crates:
//! - [`config`]: validated daemon settings with environment overrides
//! - [`logging`]: `tracing-subscriber` setup for the binary
//! - [`events`]: the broadcast event bus handed to the runner and engine

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
