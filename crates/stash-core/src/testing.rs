//! In-process fakes of the host browser and the capture backend

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use stash_backend::{ArchivePath, Backend, BackendError, FileEntry, RecordingId, SearchMatch};
use stash_library::{BookmarkNode, BookmarkStore, LibraryError};
use stash_session::{Session, SessionState, TabId};
use stash_storage::Database;

use crate::config::Config;
use crate::host::{TabHost, TabInfo};
use crate::router::CaptureRouter;

pub(crate) const SITE: &str = "https://example.com";
pub(crate) const LOCAL: &str = "http://127.0.0.1:9000";
pub(crate) const LIBRARY_ROOT: &str = "lib";

/// Poll `condition` until it holds, failing the test after two seconds.
pub(crate) async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    /// Every call except polls, in order, as (action, arguments)
    pub log: Arc<Mutex<Vec<(String, Value)>>>,
    output: Mutex<HashMap<RecordingId, VecDeque<String>>>,
    finished: Mutex<HashSet<RecordingId>>,
    fail_start: AtomicBool,
    /// Stopped recordings keep running until `end`
    hold_after_stop: AtomicBool,
}

impl FakeBackend {
    /// Queue an output line for the next poll.
    pub fn emit(&self, id: RecordingId, line: &str) {
        self.output
            .lock()
            .entry(id)
            .or_default()
            .push_back(line.to_string());
    }

    /// End the recording without a stop request.
    pub fn end(&self, id: RecordingId) {
        self.finished.lock().insert(id);
    }

    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn hold_after_stop(&self) {
        self.hold_after_stop.store(true, Ordering::SeqCst);
    }

    pub fn call_names(&self) -> Vec<String> {
        self.log.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn calls_named(&self, name: &str) -> Vec<Value> {
        self.log
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, args)| args.clone())
            .collect()
    }

    fn record(&self, name: &str, args: Value) {
        self.log.lock().push((name.to_string(), args));
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn set_library_root(&self, path: Option<&str>) -> stash_backend::Result<String> {
        self.record("setLibraryRoot", json!({ "path": path }));
        Ok(path.unwrap_or("/archive").to_string())
    }

    async fn start_recording(
        &self,
        id: RecordingId,
        path: &ArchivePath,
        url: &str,
    ) -> stash_backend::Result<()> {
        self.record("startRecording", json!({ "id": id, "path": path, "url": url }));
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(BackendError::Remote("recorder failed to start".into()));
        }
        Ok(())
    }

    async fn get_recording_output(
        &self,
        id: RecordingId,
    ) -> stash_backend::Result<Option<Vec<String>>> {
        let lines: Vec<String> = self
            .output
            .lock()
            .get_mut(&id)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default();

        if lines.is_empty() && self.finished.lock().contains(&id) {
            return Ok(None);
        }
        Ok(Some(lines))
    }

    async fn stop_recording(&self, id: RecordingId) -> stash_backend::Result<()> {
        self.record("stopRecording", json!({ "id": id }));
        if !self.hold_after_stop.load(Ordering::SeqCst) {
            self.finished.lock().insert(id);
        }
        Ok(())
    }

    async fn move_file(&self, from: &ArchivePath, to: &ArchivePath) -> stash_backend::Result<()> {
        self.record("moveFile", json!({ "from": from, "to": to }));
        Ok(())
    }

    async fn delete_file(
        &self,
        path: &ArchivePath,
        undelete_id: Option<&str>,
    ) -> stash_backend::Result<()> {
        self.record("deleteFile", json!({ "path": path, "undeleteId": undelete_id }));
        Ok(())
    }

    async fn undelete_file(&self, undelete_id: &str) -> stash_backend::Result<()> {
        self.record("undeleteFile", json!({ "undeleteId": undelete_id }));
        Ok(())
    }

    async fn update_search_index(&self, path: &ArchivePath) -> stash_backend::Result<()> {
        self.record("updateSearchIndex", json!({ "path": path }));
        Ok(())
    }

    async fn get_file_listing(&self, _path: &ArchivePath) -> stash_backend::Result<Vec<FileEntry>> {
        Ok(Vec::new())
    }

    async fn execute_search(&self, _query: &str) -> stash_backend::Result<Vec<SearchMatch>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub(crate) struct FakeTabs {
    tabs: Mutex<Vec<TabInfo>>,
    reloads: Mutex<Vec<TabId>>,
    updates: Mutex<Vec<(TabId, String)>>,
}

impl FakeTabs {
    pub fn open(&self, id: TabId, url: &str) {
        self.tabs.lock().push(TabInfo {
            id,
            url: url.to_string(),
        });
    }

    pub fn reloads(&self) -> Vec<TabId> {
        self.reloads.lock().clone()
    }

    pub fn updates(&self) -> Vec<(TabId, String)> {
        self.updates.lock().clone()
    }
}

#[async_trait]
impl TabHost for FakeTabs {
    async fn query(&self) -> crate::Result<Vec<TabInfo>> {
        Ok(self.tabs.lock().clone())
    }

    async fn reload(&self, tab_id: TabId) -> crate::Result<()> {
        self.reloads.lock().push(tab_id);
        Ok(())
    }

    async fn update_url(&self, tab_id: TabId, url: &str) -> crate::Result<()> {
        self.updates.lock().push((tab_id, url.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeBookmarks {
    nodes: Mutex<HashMap<String, BookmarkNode>>,
    folders_created: AtomicUsize,
}

impl FakeBookmarks {
    pub fn insert(&self, node: BookmarkNode) {
        self.nodes.lock().insert(node.id.clone(), node);
    }

    pub fn node(&self, id: &str) -> Option<BookmarkNode> {
        self.nodes.lock().get(id).cloned()
    }

    pub fn url_of(&self, id: &str) -> Option<String> {
        self.node(id).and_then(|n| n.url)
    }

    pub fn rename(&self, id: &str, title: &str) {
        if let Some(node) = self.nodes.lock().get_mut(id) {
            node.title = title.to_string();
        }
    }

    pub fn move_to(&self, id: &str, parent_id: &str) {
        if let Some(node) = self.nodes.lock().get_mut(id) {
            node.parent_id = Some(parent_id.to_string());
        }
    }

    pub fn remove(&self, id: &str) -> Option<BookmarkNode> {
        self.nodes.lock().remove(id)
    }

    pub fn folders_created(&self) -> usize {
        self.folders_created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BookmarkStore for FakeBookmarks {
    async fn get(&self, id: &str) -> stash_library::Result<Option<BookmarkNode>> {
        Ok(self.node(id))
    }

    async fn get_subtree(&self, id: &str) -> stash_library::Result<Vec<BookmarkNode>> {
        let nodes = self.nodes.lock();
        let root = nodes
            .get(id)
            .cloned()
            .ok_or_else(|| LibraryError::NotFound(id.to_string()))?;

        let mut subtree = vec![root];
        let mut index = 0;
        while index < subtree.len() {
            let parent = subtree[index].id.clone();
            subtree.extend(
                nodes
                    .values()
                    .filter(|n| n.parent_id.as_deref() == Some(parent.as_str()))
                    .cloned(),
            );
            index += 1;
        }
        Ok(subtree)
    }

    async fn children(&self, id: &str) -> stash_library::Result<Vec<BookmarkNode>> {
        let mut children: Vec<BookmarkNode> = self
            .nodes
            .lock()
            .values()
            .filter(|n| n.parent_id.as_deref() == Some(id))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(children)
    }

    async fn base_folders(&self) -> stash_library::Result<Vec<BookmarkNode>> {
        let mut bases: Vec<BookmarkNode> = self
            .nodes
            .lock()
            .values()
            .filter(|n| n.parent_id.is_none())
            .cloned()
            .collect();
        bases.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(bases)
    }

    async fn create_folder(&self, parent_id: &str, title: &str) -> stash_library::Result<BookmarkNode> {
        let count = self.folders_created.fetch_add(1, Ordering::SeqCst) + 1;
        let node = BookmarkNode::folder(&format!("folder-{}", count), Some(parent_id), title);
        self.insert(node.clone());
        Ok(node)
    }

    async fn update_url(&self, id: &str, url: &str) -> stash_library::Result<()> {
        match self.nodes.lock().get_mut(id) {
            Some(node) => {
                node.url = Some(url.to_string());
                Ok(())
            }
            None => Err(LibraryError::NotFound(id.to_string())),
        }
    }
}

pub(crate) fn test_config() -> Config {
    Config {
        poll_interval_ms: 5,
        accept_timeout_ms: 500,
        drain_timeout_ms: 500,
        max_poll_failures: 3,
        ..Config::new(PathBuf::from("stash-test"))
    }
}

/// A router over fakes. The library is
///
/// ```text
/// menu/
///   Library/        (lib)
///     A/            (a)
///       B           (b)  https://example.com
///     C             (c)  https://news.example.org/today
///   Elsewhere/      (out)
///     X             (x)  https://outside.net
/// ```
pub(crate) struct Harness {
    pub router: CaptureRouter,
    pub backend: Arc<FakeBackend>,
    pub bookmarks: Arc<FakeBookmarks>,
    pub tabs: Arc<FakeTabs>,
    pub db: Database,
}

impl Harness {
    pub async fn new() -> Self {
        let harness = Self::without_library().await;
        let store = &harness.bookmarks;
        store.insert(BookmarkNode::folder(LIBRARY_ROOT, Some("menu"), "Library"));
        store.insert(BookmarkNode::folder("a", Some(LIBRARY_ROOT), "A"));
        store.insert(BookmarkNode::leaf("b", "a", "B", SITE));
        store.insert(BookmarkNode::leaf("c", LIBRARY_ROOT, "C", "https://news.example.org/today"));
        store.insert(BookmarkNode::folder("out", Some("menu"), "Elsewhere"));
        store.insert(BookmarkNode::leaf("x", "out", "X", "https://outside.net"));

        harness.router.initialize().await.unwrap();
        harness
    }

    /// Only the base folder exists and the router is not initialized.
    pub async fn without_library() -> Self {
        let backend = Arc::new(FakeBackend::default());
        let bookmarks = Arc::new(FakeBookmarks::default());
        let tabs = Arc::new(FakeTabs::default());
        bookmarks.insert(BookmarkNode::folder("menu", None, "Bookmarks Menu"));

        let db = Database::open_in_memory().unwrap();
        let router = CaptureRouter::new(
            test_config(),
            db.clone(),
            backend.clone(),
            bookmarks.clone(),
            tabs.clone(),
        )
        .unwrap();

        Self {
            router,
            backend,
            bookmarks,
            tabs,
            db,
        }
    }

    /// Start a session for `bookmark_id` in `tab_id` and have the backend
    /// accept it at `LOCAL`.
    pub async fn accepted(&self, bookmark_id: &str, tab_id: TabId) -> Session {
        let url = self.bookmarks.url_of(bookmark_id).unwrap();
        let session = self.router.create(bookmark_id, &url, tab_id).await.unwrap();
        self.backend.emit(session.id, &format!("ACCEPT {}", LOCAL));

        wait_until("bookmark rewrite", || {
            self.bookmarks.url_of(bookmark_id).as_deref() == Some(LOCAL)
        })
        .await;
        self.router.session_for_bookmark(bookmark_id).unwrap()
    }

    pub async fn wait_for_state(&self, bookmark_id: &str, state: SessionState) {
        wait_until("session state", || {
            self.router
                .session_for_bookmark(bookmark_id)
                .is_some_and(|s| s.state == state)
        })
        .await;
    }

    pub async fn wait_for_removal(&self, bookmark_id: &str) {
        wait_until("session removal", || {
            self.router.session_for_bookmark(bookmark_id).is_none()
        })
        .await;
    }
}
