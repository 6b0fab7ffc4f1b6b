//! Error types for the infraflow backend

use thiserror::Error;

/// Main error type for the backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Commit not found: {0}")]
    CommitNotFound(String),

    #[error("Cannot delete the last remaining branch: {0}")]
    LastBranch(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Crypto error: {0}")]
    CryptoError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// A failure after which a compensating action ran
    #[error("{cause}; {compensation}")]
    Compensated {
        #[source]
        cause: Box<BackendError>,
        compensation: String,
    },
}
