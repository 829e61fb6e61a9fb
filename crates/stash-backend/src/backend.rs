//! Backend operations

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Identifies one recording; the router uses its session id.
pub type RecordingId = u64;

/// Archive location relative to the library root, one segment per folder
/// title with the bookmark title last.
pub type ArchivePath = [String];

/// One entry of an archive listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub url: String,
    #[serde(default)]
    pub compressed_size: u64,
    #[serde(default)]
    pub uncompressed_size: u64,
    /// Unix timestamp
    #[serde(default)]
    pub modification_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    #[serde(default)]
    pub uid: i64,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Select the library directory. `None` reuses the backend's current or
    /// default root. Returns the directory the backend settled on.
    async fn set_library_root(&self, path: Option<&str>) -> Result<String>;

    async fn start_recording(&self, id: RecordingId, path: &ArchivePath, url: &str)
        -> Result<()>;

    /// Output lines produced since the last poll. `None` once the recording
    /// has finished.
    async fn get_recording_output(&self, id: RecordingId) -> Result<Option<Vec<String>>>;

    async fn stop_recording(&self, id: RecordingId) -> Result<()>;

    async fn move_file(&self, from: &ArchivePath, to: &ArchivePath) -> Result<()>;

    /// Soft-delete when `undelete_id` is given, so `undelete_file` can
    /// restore it.
    async fn delete_file(&self, path: &ArchivePath, undelete_id: Option<&str>) -> Result<()>;

    async fn undelete_file(&self, undelete_id: &str) -> Result<()>;

    async fn update_search_index(&self, path: &ArchivePath) -> Result<()>;

    async fn get_file_listing(&self, path: &ArchivePath) -> Result<Vec<FileEntry>>;

    async fn execute_search(&self, query: &str) -> Result<Vec<SearchMatch>>;
}
