//! Stash Bookmark Library
//!
//! The library is the bookmark subtree whose leaves are archive-backed. This
//! crate mirrors that subtree from the host bookmark store and answers two
//! questions for the router: which bookmark does an address belong to, and
//! where in the archive does a bookmark live.

mod error;
mod mirror;
mod node;

pub use error::LibraryError;
pub use mirror::{normalize_url, BookmarkMirror, BookmarkPath, MAX_PATH_DEPTH};
pub use node::{BookmarkId, BookmarkNode, BookmarkStore, NodeKind};

pub type Result<T> = std::result::Result<T, LibraryError>;
