use bridge_traits::BridgeError;
use core_store::StoreError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Rate limiting, server unavailable or a dropped connection. Worth
    /// retrying on a later attempt.
    #[error("Transient source error: {0}")]
    TransientSource(String),

    /// Authorization or validation failure reported by the remote source.
    #[error("Permanent source error: {0}")]
    PermanentSource(String),

    #[error("Source did not answer within {0:?}")]
    SourceTimeout(Duration),

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::TransientSource(_) | SyncError::SourceTimeout(_)
        )
    }

    pub fn is_permanent_source(&self) -> bool {
        matches!(self, SyncError::PermanentSource(_))
    }
}

impl From<BridgeError> for SyncError {
    fn from(err: BridgeError) -> Self {
        let retryable = err.is_retryable();
        let message = match err {
            BridgeError::Transient(message) | BridgeError::Permanent(message) => message,
            other => other.to_string(),
        };

        if retryable {
            SyncError::TransientSource(message)
        } else {
            SyncError::PermanentSource(message)
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
