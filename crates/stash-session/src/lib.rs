//! Stash Capture Sessions
//!
//! A capture session binds one library bookmark to the browser tabs showing
//! it while the backend records and serves it:
//! - At most one live session per bookmark
//! - A tab belongs to at most one session
//! - Sessions stop when their last tab leaves and disappear only when the
//!   backend reports the recording finished
//! - Work queued against a bookmark waits until its session is gone

mod error;
mod event;
mod registry;
mod session;
mod state;

pub use error::SessionError;
pub use event::SessionEvent;
pub use registry::{
    AttachOutcome, Detached, FinishAction, FinishHandle, Finished, SessionRegistry, Stopped,
    Subscriber, SubscriberId,
};
pub use session::{Session, SessionId, TabId};
pub use state::SessionState;

pub type Result<T> = std::result::Result<T, SessionError>;
