//! Stash Capture Backend Client
//!
//! The capture backend records, serves, moves and indexes archives. It runs
//! as a separate process and is reached through a request/response protocol:
//! each request is a JSON object `{action, requestId, ...}` and each response
//! echoes the `requestId`, carrying either the result fields or `error`.

mod backend;
mod error;
mod frame;
mod native;
mod rpc;

pub use backend::{ArchivePath, Backend, FileEntry, RecordingId, SearchMatch};
pub use error::BackendError;
pub use frame::{read_frame, write_frame, MAX_FRAME_LEN};
pub use native::NativeMessagingTransport;
pub use rpc::{RpcBackend, Transport};

pub type Result<T> = std::result::Result<T, BackendError>;
