//! Native messaging transport
//!
//! Runs the backend executable as a child process and talks to it over its
//! stdin/stdout with length-prefixed JSON frames. Responses may arrive out of
//! order and are matched to their request by `requestId`.

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::BackendError;
use crate::frame::{read_frame, write_frame};
use crate::rpc::Transport;
use crate::Result;

type Waiters = Arc<SyncMutex<HashMap<u64, oneshot::Sender<Value>>>>;

pub struct NativeMessagingTransport {
    program: PathBuf,
    args: Vec<String>,
    connection: Mutex<Option<Connection>>,
}

struct Connection {
    stdin: ChildStdin,
    waiters: Waiters,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    // Killed on drop
    _child: Child,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl NativeMessagingTransport {
    /// The process is started lazily on the first request.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            connection: Mutex::new(None),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| !c.closed.load(Ordering::SeqCst))
    }

    /// Terminate the backend process. Pending requests fail with
    /// `Disconnected`.
    pub async fn shutdown(&self) {
        if self.connection.lock().await.take().is_some() {
            tracing::info!(program = %self.program.display(), "Backend process stopped");
        }
    }

    fn connect(&self) -> Result<Connection> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::Protocol("backend stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Protocol("backend stdout unavailable".into()))?;

        let waiters: Waiters = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_responses(
            stdout,
            Arc::clone(&waiters),
            Arc::clone(&closed),
        ));

        tracing::info!(
            program = %self.program.display(),
            pid = child.id(),
            "Backend process started"
        );

        Ok(Connection {
            stdin,
            waiters,
            closed,
            reader,
            _child: child,
        })
    }
}

#[async_trait]
impl Transport for NativeMessagingTransport {
    async fn round_trip(&self, request_id: u64, request: Value) -> Result<Value> {
        let response = {
            let mut guard = self.connection.lock().await;

            let stale = guard
                .as_ref()
                .map_or(true, |c| c.closed.load(Ordering::SeqCst));
            if stale {
                *guard = Some(self.connect()?);
            }
            let Some(connection) = guard.as_mut() else {
                return Err(BackendError::Disconnected);
            };

            let (tx, rx) = oneshot::channel();
            connection.waiters.lock().insert(request_id, tx);
            // The reader sets `closed` before clearing the waiters
            if connection.closed.load(Ordering::SeqCst) {
                connection.waiters.lock().remove(&request_id);
                *guard = None;
                return Err(BackendError::Disconnected);
            }

            if let Err(e) = write_frame(&mut connection.stdin, &request).await {
                tracing::warn!(request_id, error = %e, "Failed to write to backend");
                *guard = None;
                return Err(BackendError::Disconnected);
            }
            rx
        };

        response.await.map_err(|_| BackendError::Disconnected)
    }
}

async fn read_responses(mut stdout: ChildStdout, waiters: Waiters, closed: Arc<AtomicBool>) {
    loop {
        match read_frame(&mut stdout).await {
            Ok(Some(response)) => {
                let Some(request_id) = response.get("requestId").and_then(Value::as_u64) else {
                    tracing::warn!("Backend response without requestId");
                    continue;
                };
                match waiters.lock().remove(&request_id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => tracing::debug!(request_id, "No waiter for backend response"),
                }
            }
            Ok(None) => {
                tracing::warn!("Backend closed its output");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read backend response");
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    // Dropping the senders fails every outstanding request
    waiters.lock().clear();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    // `cat` echoes each frame back, which is a valid response for its own
    // request id.
    #[tokio::test]
    async fn test_round_trip_through_child_process() {
        let transport = NativeMessagingTransport::new("cat");

        let response = transport
            .round_trip(7, json!({ "action": "getStatus", "requestId": 7 }))
            .await
            .unwrap();
        assert_eq!(response["requestId"], 7);
        assert!(transport.is_connected().await);

        transport.shutdown().await;
        assert!(!transport.is_connected().await);

        let response = transport
            .round_trip(8, json!({ "action": "getStatus", "requestId": 8 }))
            .await
            .unwrap();
        assert_eq!(response["requestId"], 8);
    }

    #[tokio::test]
    async fn test_exited_process_disconnects() {
        let transport = NativeMessagingTransport::new("true");

        let result = transport
            .round_trip(1, json!({ "action": "getStatus", "requestId": 1 }))
            .await;
        assert!(matches!(result, Err(BackendError::Disconnected)));
    }

    #[tokio::test]
    async fn test_missing_program_is_io_error() {
        let transport = NativeMessagingTransport::new("/nonexistent/stash-backend");

        let result = transport.round_trip(1, json!({ "requestId": 1 })).await;
        assert!(matches!(result, Err(BackendError::Io(_))));
    }
}
