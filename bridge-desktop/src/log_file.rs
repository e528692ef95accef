//! JSON-lines log file sink

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    time::{LogEntry, LogLevel, LoggerSink},
};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Appends every [`LogEntry`] to a file as one JSON object per line.
///
/// The file is created if missing and never truncated, so consecutive daemon
/// runs share one log.
pub struct JsonLinesLogSink {
    path: PathBuf,
    file: Mutex<File>,
    min_level: LogLevel,
}

impl JsonLinesLogSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            min_level: LogLevel::Info,
        })
    }

    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for JsonLinesLogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesLogSink")
            .field("path", &self.path)
            .field("min_level", &self.min_level)
            .finish()
    }
}

#[async_trait]
impl LoggerSink for JsonLinesLogSink {
    async fn log(&self, entry: LogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(&entry)
            .map_err(|e| BridgeError::OperationFailed(format!("encode log entry: {}", e)))?;
        line.push(b'\n');

        // One write per line under the lock keeps lines whole.
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }
}
