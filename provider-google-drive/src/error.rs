//! Error types for Google Drive provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GoogleDriveError {
    /// Token missing, expired or lacking scope (401/403)
    #[error("Authentication failed (status {status_code}): {message}")]
    AuthenticationFailed { status_code: u16, message: String },

    /// Any other non-success response that retrying will not fix
    #[error("Google Drive API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    #[error("Google Drive unavailable (status {status_code}) after {attempts} attempts")]
    ServiceUnavailable { status_code: u16, attempts: u32 },

    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, GoogleDriveError>;

impl GoogleDriveError {
    pub fn is_transient(&self) -> bool {
        match self {
            GoogleDriveError::RateLimitExceeded { .. }
            | GoogleDriveError::ServiceUnavailable { .. } => true,
            GoogleDriveError::BridgeError(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<GoogleDriveError> for BridgeError {
    fn from(error: GoogleDriveError) -> Self {
        match error {
            GoogleDriveError::BridgeError(e) => e,
            e if e.is_transient() => BridgeError::Transient(e.to_string()),
            e => BridgeError::Permanent(e.to_string()),
        }
    }
}
