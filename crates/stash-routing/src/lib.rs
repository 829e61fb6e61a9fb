//! Stash Routing Primitives
//!
//! - `UrlTranslator`: maps addresses between their original form and the form
//!   served by the capture backend (`http://127.0.0.1:<port>/...`)
//! - `RecentSessions`: persisted log of serving origins, so local addresses
//!   can be mapped back after their session has ended
//! - `BypassHosts`: domains whose resources always load live

mod bypass;
mod error;
mod recent;
mod translator;

pub use bypass::BypassHosts;
pub use error::RoutingError;
pub use recent::{RecentSessionEntry, RecentSessions, RECENT_SESSIONS_KEY, RECENT_SESSION_LIMIT};
pub use translator::{origin_of, UrlTranslator, DEFAULT_LOCAL_HOSTS};

pub type Result<T> = std::result::Result<T, RoutingError>;
