//! Stash Storage Layer
//!
//! SQLite-backed key/value settings shared by the router crates. Values are
//! stored as text; structured values go through the JSON helpers.

mod database;
mod error;
mod migrations;

pub use database::Database;
pub use error::StorageError;

pub type Result<T> = std::result::Result<T, StorageError>;
