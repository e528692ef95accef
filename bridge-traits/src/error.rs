use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    /// Failure that may succeed if retried later (rate limiting, server
    /// unavailable, connection reset, timeout).
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Failure that will not go away on its own (authorization, invalid
    /// request, malformed response).
    #[error("Permanent failure: {0}")]
    Permanent(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the operation is worth attempting again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Transient(_) => true,
            BridgeError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
