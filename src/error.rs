//! Electorate Error Types

use thiserror::Error;

use crate::state::LeadershipState;

/// Result type alias for electorate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Electorate error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Coordination service errors
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Coordination session expired")]
    SessionExpired,

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Election path invalid: {0}")]
    InvalidPath(String),

    // Election errors
    #[error("Registration failed for {path}: {reason}")]
    Registration { path: String, reason: String },

    #[error("Already registered on {path} (state: {state})")]
    AlreadyRegistered {
        path: String,
        state: LeadershipState,
    },

    // Tenure errors
    #[error("Leadership workload failed: {0}")]
    Workload(#[source] anyhow::Error),

    #[error("Election stopped")]
    Stopped,

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is transient and worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this error means the coordination session is gone,
    /// along with every ephemeral node it owned
    pub fn implies_session_loss(&self) -> bool {
        matches!(self, Error::SessionExpired)
    }
}
