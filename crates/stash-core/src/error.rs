//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] stash_storage::StorageError),

    #[error("Library error: {0}")]
    Library(#[from] stash_library::LibraryError),

    #[error("Routing error: {0}")]
    Routing(#[from] stash_routing::RoutingError),

    #[error("Session error: {0}")]
    Session(#[from] stash_session::SessionError),

    #[error("Backend error: {0}")]
    Backend(#[from] stash_backend::BackendError),

    #[error("Tab host error: {0}")]
    Host(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Library root not initialized")]
    NotInitialized,
}
