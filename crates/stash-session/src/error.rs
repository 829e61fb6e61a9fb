//! Session error types

use thiserror::Error;

use crate::session::{SessionId, TabId};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Bookmark {0} already has a capture session")]
    BookmarkBusy(String),

    #[error("Tab {0} is already attached to a capture session")]
    TabBusy(TabId),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}
