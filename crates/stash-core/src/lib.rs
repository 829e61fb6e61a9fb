//! Stash Core
//!
//! `CaptureRouter` ties the bookmark library, the capture backend and the
//! host browser together:
//! - Navigations to library bookmarks start or join a capture session and are
//!   redirected to the address the backend serves it from
//! - Sub-resources of served pages are routed through the same session
//! - Bookmark renames, moves and removals are mirrored onto the archive once
//!   the affected session has finished

mod config;
mod error;
mod host;
mod requests;
mod router;
mod sync;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::CoreError;
pub use host::{TabHost, TabInfo};
pub use requests::{InterceptedRequest, RequestVerdict};
pub use router::{CaptureRouter, BOOKMARK_ROOT_KEY, BYPASS_HOSTS_KEY};
pub use sync::BookmarkEvent;

// Re-export the component crates
pub use stash_backend::{
    Backend, BackendError, FileEntry, NativeMessagingTransport, RpcBackend, SearchMatch, Transport,
};
pub use stash_library::{BookmarkId, BookmarkNode, BookmarkPath, BookmarkStore, NodeKind};
pub use stash_routing::{RecentSessionEntry, UrlTranslator};
pub use stash_session::{FinishAction, FinishHandle, Session, SessionState, Subscriber, SubscriberId, TabId};
pub use stash_storage::Database;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
