//! Library error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Bookmark not found: {0}")]
    NotFound(String),

    #[error("Bookmark store error: {0}")]
    Store(String),

    #[error("Library root is not configured")]
    NoRoot,
}
