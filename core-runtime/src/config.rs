//! # Daemon Configuration
//!
//! Builder-based configuration for the sync daemon with fail-fast validation.
//!
//! ```ignore
//! use core_runtime::config::DaemonConfig;
//! use std::time::Duration;
//!
//! let config = DaemonConfig::builder()
//!     .database_path("drive-sync.db")
//!     .poll_interval(Duration::from_secs(5))
//!     .build()?;
//! ```
//!
//! Values can be seeded from the environment with
//! [`DaemonConfigBuilder::from_env`]; explicit builder calls made afterwards
//! take precedence.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `DRIVE_SYNC_DB` | `database_path` |
//! | `DRIVE_SYNC_POLL_INTERVAL_SECS` | `poll_interval` |
//! | `DRIVE_SYNC_BATCH_SIZE` | `batch_size` |
//! | `DRIVE_SYNC_PAGE_SIZE` | `page_size` |
//! | `DRIVE_SYNC_MAX_ATTEMPTS` | `default_max_attempts` |
//! | `DRIVE_SYNC_SOURCE_TIMEOUT_SECS` | `source_timeout` |
//! | `DRIVE_SYNC_ACCESS_TOKEN` | `access_token` |

use crate::error::{Error, Result};
use crate::logging::redact_if_sensitive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_BATCH_SIZE: u32 = 5;
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Largest page the remote listing accepts.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Validated daemon settings. Build with [`DaemonConfig::builder`].
#[derive(Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Path to the SQLite database file
    pub database_path: PathBuf,

    /// Sleep between polls when no job is runnable
    pub poll_interval: Duration,

    /// Jobs fetched per poll
    pub batch_size: u32,

    /// Records requested per remote page
    pub page_size: u32,

    /// Retry budget given to jobs created without an explicit one
    pub default_max_attempts: u32,

    /// Deadline around each remote page request
    pub source_timeout: Option<Duration>,

    /// Permanent source errors mark the job DEAD without using the
    /// remaining attempts
    pub dead_on_permanent_error: bool,

    /// OAuth bearer token for the remote source
    pub access_token: Option<String>,
}

impl std::fmt::Debug for DaemonConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonConfig")
            .field("database_path", &self.database_path)
            .field("poll_interval", &self.poll_interval)
            .field("batch_size", &self.batch_size)
            .field("page_size", &self.page_size)
            .field("default_max_attempts", &self.default_max_attempts)
            .field("source_timeout", &self.source_timeout)
            .field("dead_on_permanent_error", &self.dead_on_permanent_error)
            .field(
                "access_token",
                &self
                    .access_token
                    .as_deref()
                    .map(|t| redact_if_sensitive("access_token", t)),
            )
            .finish()
    }
}

impl DaemonConfig {
    pub fn builder() -> DaemonConfigBuilder {
        DaemonConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.poll_interval.is_zero() {
            return Err(Error::Config(
                "Poll interval must be greater than zero".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(Error::Config(
                "Batch size must be greater than 0".to_string(),
            ));
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::Config(format!(
                "Page size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        if self.default_max_attempts == 0 {
            return Err(Error::Config(
                "Max attempts must be at least 1".to_string(),
            ));
        }

        if matches!(self.source_timeout, Some(t) if t.is_zero()) {
            return Err(Error::Config(
                "Source timeout must be greater than zero when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Access token for the remote source, or an actionable error.
    pub fn require_access_token(&self) -> Result<&str> {
        self.access_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::CapabilityMissing {
                capability: "MetadataSource".to_string(),
                message: "No Google Drive access token configured. \
                          Set DRIVE_SYNC_ACCESS_TOKEN or pass --access-token \
                          (scope drive.metadata.readonly is sufficient)."
                    .to_string(),
            })
    }
}

/// Builder for [`DaemonConfig`].
#[derive(Default, Clone)]
pub struct DaemonConfigBuilder {
    database_path: Option<PathBuf>,
    poll_interval: Option<Duration>,
    batch_size: Option<u32>,
    page_size: Option<u32>,
    default_max_attempts: Option<u32>,
    source_timeout: Option<Duration>,
    dead_on_permanent_error: bool,
    access_token: Option<String>,
}

impl DaemonConfigBuilder {
    /// Builder seeded from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps variable names to values.
    ///
    /// Blank values are ignored; values that do not parse are an error.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(path) = get("DRIVE_SYNC_DB") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = get("DRIVE_SYNC_POLL_INTERVAL_SECS") {
            self.poll_interval = Some(Duration::from_secs(parse_var(
                "DRIVE_SYNC_POLL_INTERVAL_SECS",
                &raw,
            )?));
        }
        if let Some(raw) = get("DRIVE_SYNC_BATCH_SIZE") {
            self.batch_size = Some(parse_var("DRIVE_SYNC_BATCH_SIZE", &raw)?);
        }
        if let Some(raw) = get("DRIVE_SYNC_PAGE_SIZE") {
            self.page_size = Some(parse_var("DRIVE_SYNC_PAGE_SIZE", &raw)?);
        }
        if let Some(raw) = get("DRIVE_SYNC_MAX_ATTEMPTS") {
            self.default_max_attempts = Some(parse_var("DRIVE_SYNC_MAX_ATTEMPTS", &raw)?);
        }
        if let Some(raw) = get("DRIVE_SYNC_SOURCE_TIMEOUT_SECS") {
            self.source_timeout = Some(Duration::from_secs(parse_var(
                "DRIVE_SYNC_SOURCE_TIMEOUT_SECS",
                &raw,
            )?));
        }
        if let Some(token) = get("DRIVE_SYNC_ACCESS_TOKEN") {
            self.access_token = Some(token);
        }

        Ok(self)
    }

    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Use `path` only if neither the environment nor an earlier call set one.
    pub fn database_path_or<P: Into<PathBuf>>(mut self, path: P) -> Self {
        if self.database_path.is_none() {
            self.database_path = Some(path.into());
        }
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn batch_size(mut self, size: u32) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn default_max_attempts(mut self, attempts: u32) -> Self {
        self.default_max_attempts = Some(attempts);
        self
    }

    pub fn source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = Some(timeout);
        self
    }

    pub fn dead_on_permanent_error(mut self, enabled: bool) -> Self {
        self.dead_on_permanent_error = enabled;
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn build(self) -> Result<DaemonConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config(
                "Database path is required. Pass --db or set DRIVE_SYNC_DB.".to_string(),
            )
        })?;

        let config = DaemonConfig {
            database_path,
            poll_interval: self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            page_size: self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            default_max_attempts: self.default_max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            source_timeout: self.source_timeout,
            dead_on_permanent_error: self.dead_on_permanent_error,
            access_token: self.access_token,
        };

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| Error::Config(format!("invalid {}={:?}: {}", key, raw, e)))
}
