use thiserror::Error;

/// Failures while assembling the daemon process: settings, logging and
/// required capabilities. Job and sync failures have their own types.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing setting, from flags or environment.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A collaborator the requested command needs was not configured.
    #[error("{capability} unavailable: {message}")]
    CapabilityMissing { capability: String, message: String },

    /// The tracing subscriber could not be installed.
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;
