//! Routing error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("Storage error: {0}")]
    Storage(#[from] stash_storage::StorageError),
}
