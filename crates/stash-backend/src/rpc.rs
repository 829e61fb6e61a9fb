//! JSON request/response client

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::{ArchivePath, Backend, FileEntry, RecordingId, SearchMatch};
use crate::error::BackendError;
use crate::Result;

/// Carries one request to the backend and returns its response.
#[async_trait]
pub trait Transport: Send + Sync {
    /// `Err(BackendError::Disconnected)` if the connection dropped before the
    /// response arrived. The next call reconnects.
    async fn round_trip(&self, request_id: u64, request: Value) -> Result<Value>;
}

/// `Backend` over any `Transport`.
///
/// The backend forgets its library root when it restarts, so the last root
/// is applied again after a dropped connection. Only actions that are safe to
/// repeat are then retried once; the others report `Disconnected`.
pub struct RpcBackend<T> {
    transport: T,
    next_request_id: AtomicU64,
    library_root: Mutex<Option<String>>,
}

impl<T: Transport> RpcBackend<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_request_id: AtomicU64::new(1),
            library_root: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Last root acknowledged by the backend.
    pub fn library_root(&self) -> Option<String> {
        self.library_root.lock().clone()
    }

    async fn call(&self, action: &str, params: Value) -> Result<Value> {
        match self.send(action, params.clone()).await {
            Err(BackendError::Disconnected) => {
                tracing::warn!(action, "Backend disconnected, reconnecting");
                self.restore_library_root().await?;
                if !is_retryable(action) {
                    return Err(BackendError::Disconnected);
                }
                self.send(action, params).await
            }
            other => other,
        }
    }

    async fn send(&self, action: &str, params: Value) -> Result<Value> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);

        let mut request = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        request.insert("action".to_string(), json!(action));
        request.insert("requestId".to_string(), json!(request_id));

        tracing::trace!(action, request_id, "Backend request");
        let response = self
            .transport
            .round_trip(request_id, Value::Object(request))
            .await?;

        if let Some(error) = response.get("error") {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            tracing::debug!(action, request_id, error = %message, "Backend request failed");
            return Err(BackendError::Remote(message));
        }

        Ok(response)
    }

    async fn restore_library_root(&self) -> Result<()> {
        let Some(root) = self.library_root() else {
            return Ok(());
        };
        self.send("setLibraryRoot", json!({ "path": root })).await?;
        Ok(())
    }

    fn field<D: serde::de::DeserializeOwned>(response: &mut Value, key: &str) -> Result<Option<D>> {
        match response.get_mut(key).map(Value::take) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }
}

/// Reads and idempotent writes. A lost response to anything else may mean the
/// backend already applied it.
fn is_retryable(action: &str) -> bool {
    matches!(
        action,
        "getRecordingOutput"
            | "stopRecording"
            | "updateSearchIndex"
            | "getFileListing"
            | "executeSearch"
    )
}

#[async_trait]
impl<T: Transport> Backend for RpcBackend<T> {
    async fn set_library_root(&self, path: Option<&str>) -> Result<String> {
        let requested = path.map(str::to_string).or_else(|| self.library_root());
        let mut response = self
            .send("setLibraryRoot", json!({ "path": requested }))
            .await?;

        let root: String = Self::field(&mut response, "path")?
            .ok_or_else(|| BackendError::Protocol("setLibraryRoot returned no path".into()))?;
        tracing::info!(root = %root, "Library root set");
        *self.library_root.lock() = Some(root.clone());
        Ok(root)
    }

    async fn start_recording(&self, id: RecordingId, path: &ArchivePath, url: &str) -> Result<()> {
        self.call("startRecording", json!({ "id": id, "path": path, "url": url }))
            .await?;
        Ok(())
    }

    async fn get_recording_output(&self, id: RecordingId) -> Result<Option<Vec<String>>> {
        let mut response = self.call("getRecordingOutput", json!({ "id": id })).await?;
        Self::field(&mut response, "events")
    }

    async fn stop_recording(&self, id: RecordingId) -> Result<()> {
        self.call("stopRecording", json!({ "id": id })).await?;
        Ok(())
    }

    async fn move_file(&self, from: &ArchivePath, to: &ArchivePath) -> Result<()> {
        self.call("moveFile", json!({ "from": from, "to": to })).await?;
        Ok(())
    }

    async fn delete_file(&self, path: &ArchivePath, undelete_id: Option<&str>) -> Result<()> {
        self.call("deleteFile", json!({ "path": path, "undeleteId": undelete_id }))
            .await?;
        Ok(())
    }

    async fn undelete_file(&self, undelete_id: &str) -> Result<()> {
        self.call("undeleteFile", json!({ "undeleteId": undelete_id }))
            .await?;
        Ok(())
    }

    async fn update_search_index(&self, path: &ArchivePath) -> Result<()> {
        self.call("updateSearchIndex", json!({ "path": path })).await?;
        Ok(())
    }

    async fn get_file_listing(&self, path: &ArchivePath) -> Result<Vec<FileEntry>> {
        let mut response = self.call("getFileListing", json!({ "path": path })).await?;
        Ok(Self::field(&mut response, "files")?.unwrap_or_default())
    }

    async fn execute_search(&self, query: &str) -> Result<Vec<SearchMatch>> {
        let mut response = self.call("executeSearch", json!({ "query": query })).await?;
        Ok(Self::field(&mut response, "matches")?.unwrap_or_default())
    }
}
