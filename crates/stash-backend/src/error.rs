//! Backend error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend handled the request and reported a failure
    #[error("Backend error: {0}")]
    Remote(String),

    #[error("Backend disconnected")]
    Disconnected,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
