//! Capture router
//!
//! Owns the session registry and drives each session's lifecycle:
//!
//! ```text
//! navigation ──create──▶ Starting ──ACCEPT──▶ Active
//!                           │                   │  last tab detached /
//!                           └───────┬───────────┘  bookmark stopped
//!                                   ▼
//!                               Finishing ──terminal event──▶ removed,
//!                                                             queued actions run
//! ```

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use stash_backend::{Backend, NativeMessagingTransport, RpcBackend};
use stash_library::{normalize_url, BookmarkId, BookmarkMirror, BookmarkPath, BookmarkStore};
use stash_routing::{origin_of, BypassHosts, RecentSessionEntry, RecentSessions, UrlTranslator};
use stash_session::{
    FinishAction, FinishHandle, Session, SessionEvent, SessionId, SessionRegistry, Subscriber,
    SubscriberId, TabId,
};
use stash_storage::Database;

use crate::config::Config;
use crate::error::CoreError;
use crate::host::TabHost;
use crate::Result;

/// Settings key of the persisted bypass host list.
pub const BYPASS_HOSTS_KEY: &str = "bypass-hosts";
/// Settings key of the library root folder id.
pub const BOOKMARK_ROOT_KEY: &str = "bookmark-root-id";

/// Routes browser traffic through capture sessions.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct CaptureRouter {
    pub(crate) config: Arc<Config>,
    pub(crate) db: Database,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) bookmarks: Arc<dyn BookmarkStore>,
    pub(crate) tabs: Arc<dyn TabHost>,
    pub(crate) mirror: Arc<RwLock<Arc<BookmarkMirror>>>,
    pub(crate) registry: Arc<Mutex<SessionRegistry>>,
    pub(crate) recent: RecentSessions,
    pub(crate) bypass: Arc<RwLock<BypassHosts>>,
    pub(crate) translator: UrlTranslator,
}

impl CaptureRouter {
    pub fn new(
        config: Config,
        db: Database,
        backend: Arc<dyn Backend>,
        bookmarks: Arc<dyn BookmarkStore>,
        tabs: Arc<dyn TabHost>,
    ) -> Result<Self> {
        let recent = RecentSessions::load_with_limit(db.clone(), config.recent_limit)?;

        let bypass = match db.get_json::<Vec<String>>(BYPASS_HOSTS_KEY)? {
            Some(hosts) => BypassHosts::new(hosts),
            None => BypassHosts::new(config.bypass_hosts.iter().cloned()),
        };
        let translator = UrlTranslator::new(config.local_hosts.iter().cloned());

        Ok(Self {
            config: Arc::new(config),
            db,
            backend,
            bookmarks,
            tabs,
            mirror: Arc::new(RwLock::new(Arc::new(BookmarkMirror::new(None)))),
            registry: Arc::new(Mutex::new(SessionRegistry::new())),
            recent,
            bypass: Arc::new(RwLock::new(bypass)),
            translator,
        })
    }

    /// Open the settings database and talk to `config.backend_program` over
    /// native messaging. The backend is started on first use.
    pub fn open(
        config: Config,
        bookmarks: Arc<dyn BookmarkStore>,
        tabs: Arc<dyn TabHost>,
    ) -> Result<Self> {
        let db = Database::open(&config.database_path)?;
        let transport = NativeMessagingTransport::new(config.backend_program.clone());
        let backend: Arc<dyn Backend> = Arc::new(RpcBackend::new(transport));

        tracing::info!(
            database = %config.database_path.display(),
            backend = %config.backend_program.display(),
            "Opening capture router"
        );
        Self::new(config, db, backend, bookmarks, tabs)
    }

    /// Resolve the library root, load the mirror and point the backend at
    /// the archive directory. Returns the root folder id.
    pub async fn initialize(&self) -> Result<BookmarkId> {
        let root_id = self.resolve_library_root().await?;
        self.load_mirror(&root_id).await?;

        match self
            .backend
            .set_library_root(self.config.filesystem_root.as_deref())
            .await
        {
            Ok(path) => tracing::info!(path = %path, "Backend library directory"),
            Err(e) => tracing::warn!(error = %e, "Backend unavailable, continuing without it"),
        }

        Ok(root_id)
    }

    /// Use `root_id` as the library folder from now on.
    pub async fn set_library_root(&self, root_id: &str) -> Result<()> {
        let node = self
            .bookmarks
            .get(root_id)
            .await?
            .filter(|n| n.is_folder())
            .ok_or_else(|| CoreError::Config(format!("{} is not a bookmark folder", root_id)))?;

        self.db.set_setting(BOOKMARK_ROOT_KEY, &node.id)?;
        self.load_mirror(&node.id).await?;
        tracing::info!(root_id = %node.id, title = %node.title, "Library root changed");
        Ok(())
    }

    pub fn library_root_id(&self) -> Option<BookmarkId> {
        self.mirror().root_id().map(str::to_string)
    }

    async fn resolve_library_root(&self) -> Result<BookmarkId> {
        let configured = match &self.config.library_root_id {
            Some(id) => Some(id.clone()),
            None => self.db.get_setting(BOOKMARK_ROOT_KEY)?,
        };

        if let Some(id) = configured {
            match self.bookmarks.get(&id).await? {
                Some(node) if node.is_folder() => return Ok(node.id),
                _ => tracing::warn!(root_id = %id, "Library root folder is gone"),
            }
        }

        let base_folders = self.bookmarks.base_folders().await?;
        for base in &base_folders {
            let children = self.bookmarks.children(&base.id).await?;
            if let Some(existing) = children
                .into_iter()
                .find(|c| c.is_folder() && c.title == self.config.library_title)
            {
                self.db.set_setting(BOOKMARK_ROOT_KEY, &existing.id)?;
                return Ok(existing.id);
            }
        }

        let parent = base_folders
            .first()
            .ok_or_else(|| CoreError::Config("bookmark store has no base folders".into()))?;
        let created = self
            .bookmarks
            .create_folder(&parent.id, &self.config.library_title)
            .await?;
        tracing::info!(root_id = %created.id, title = %created.title, "Created library folder");

        self.db.set_setting(BOOKMARK_ROOT_KEY, &created.id)?;
        Ok(created.id)
    }

    async fn load_mirror(&self, root_id: &str) -> Result<()> {
        let mirror = BookmarkMirror::load(self.bookmarks.as_ref(), root_id).await?;
        *self.mirror.write() = Arc::new(mirror);
        Ok(())
    }

    /// Rebuild the mirror from the bookmark store.
    pub async fn refresh_mirror(&self) -> Result<()> {
        let Some(root_id) = self.library_root_id() else {
            return Err(CoreError::NotInitialized);
        };
        self.load_mirror(&root_id).await
    }

    /// Current snapshot of the library subtree.
    pub fn mirror(&self) -> Arc<BookmarkMirror> {
        Arc::clone(&self.mirror.read())
    }

    pub(crate) async fn bookmark_path(&self, bookmark_id: &str) -> BookmarkPath {
        self.mirror()
            .get_path(self.bookmarks.as_ref(), bookmark_id)
            .await
    }

    // ---- Session lifecycle ----

    /// Register a session and start its recording. Fails if the bookmark or
    /// the tab already belongs to a session.
    pub async fn create(&self, bookmark_id: &str, url: &str, tab_id: TabId) -> Result<Session> {
        let session = self.registry.lock().create(bookmark_id, url, tab_id)?;

        let path = self.bookmark_path(bookmark_id).await;
        if !path.in_library {
            tracing::warn!(bookmark_id = %bookmark_id, "Recording a bookmark outside the library");
        }

        let router = self.clone();
        let id = session.id;
        let url = session.bookmark_url.clone();
        tokio::spawn(async move {
            router.run_recording(id, path.path, url).await;
        });

        Ok(session)
    }

    async fn run_recording(&self, session_id: SessionId, path: Vec<String>, url: String) {
        if let Err(e) = self.backend.start_recording(session_id, &path, &url).await {
            tracing::error!(session_id, error = %e, "Failed to start recording");
            self.finish_session(session_id).await;
            return;
        }

        let mut failures = 0;
        loop {
            match self.backend.get_recording_output(session_id).await {
                Ok(Some(lines)) => {
                    failures = 0;
                    for line in lines {
                        // Only a missing `events` field ends the stream
                        if line.trim().is_empty() {
                            continue;
                        }
                        self.handle_output(session_id, &line).await;
                    }
                }
                Ok(None) => {
                    self.finish_session(session_id).await;
                    return;
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(session_id, failures, error = %e, "Failed to poll recording");
                    if failures >= self.config.max_poll_failures {
                        tracing::error!(session_id, "Giving up on recording");
                        self.finish_session(session_id).await;
                        return;
                    }
                }
            }

            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Apply one line of recording output to its session.
    pub(crate) async fn handle_output(&self, session_id: SessionId, line: &str) {
        match SessionEvent::parse(line) {
            SessionEvent::Accept(local_url) => self.on_accept(session_id, &local_url).await,
            SessionEvent::Redirect(url) => self.on_redirect(session_id, &url),
            SessionEvent::Finished => self.finish_session(session_id).await,
            event if event.is_broadcast() => self.broadcast(session_id, line),
            _ => {}
        }
    }

    async fn on_accept(&self, session_id: SessionId, local_url: &str) {
        let accepted = self.registry.lock().accept(session_id, local_url);
        let Some((session, first)) = accepted else {
            return;
        };
        if !first {
            return;
        }

        tracing::info!(
            session_id,
            bookmark_id = %session.bookmark_id,
            local_url = %local_url,
            "Capture session serving"
        );

        let local_origin = origin_of(local_url).unwrap_or_else(|| local_url.to_string());
        let entry = RecentSessionEntry::new(
            &local_origin,
            &session.bookmark_url,
            origin_of(&session.original_url),
        );
        if let Err(e) = self.recent.record(entry) {
            tracing::warn!(session_id, error = %e, "Failed to record recent session");
        }

        if let Err(e) = self.bookmarks.update_url(&session.bookmark_id, local_url).await {
            tracing::warn!(session_id, error = %e, "Failed to point bookmark at capture");
        }

        self.reload_bookmark_tabs(&session).await;
    }

    /// Reload tabs showing the bookmark that are not part of the session yet,
    /// so their next navigation joins it.
    async fn reload_bookmark_tabs(&self, session: &Session) {
        let tabs = match self.tabs.query().await {
            Ok(tabs) => tabs,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to query tabs");
                return;
            }
        };

        let prefix = normalize_url(&session.bookmark_url);
        for tab in tabs {
            if tab.id == session.origin_tab || session.has_tab(tab.id) {
                continue;
            }
            if !normalize_url(&tab.url).starts_with(&prefix) {
                continue;
            }
            if let Err(e) = self.tabs.reload(tab.id).await {
                tracing::debug!(tab_id = tab.id, error = %e, "Failed to reload tab");
            }
        }
    }

    fn on_redirect(&self, session_id: SessionId, url: &str) {
        let redirected = self.registry.lock().redirect(session_id, url);
        let Some(session) = redirected else {
            return;
        };

        tracing::debug!(session_id, url = %url, "Live site redirected");

        let local_origin = session.local_url.as_deref().and_then(origin_of);
        if let (Some(local_origin), Some(origin)) = (local_origin, origin_of(url)) {
            if let Err(e) = self.recent.refresh_origin(&local_origin, &origin) {
                tracing::warn!(session_id, error = %e, "Failed to update recent session");
            }
        }
    }

    fn broadcast(&self, session_id: SessionId, line: &str) {
        let subscribers = self.registry.lock().record_event(session_id, line);
        let Some(subscribers) = subscribers else {
            return;
        };

        let failed: Vec<SubscriberId> = subscribers
            .iter()
            .filter_map(|(id, handler)| match handler(line) {
                Ok(()) => None,
                Err(e) => {
                    tracing::debug!(session_id, subscriber_id = id, error = %e, "Dropping subscriber");
                    Some(*id)
                }
            })
            .collect();

        self.registry.lock().remove_subscribers(session_id, &failed);
    }

    async fn finish_session(&self, session_id: SessionId) {
        let finished = self.registry.lock().finish(session_id);
        let Some(finished) = finished else {
            return;
        };
        let session = &finished.session;

        if finished.unexpected {
            tracing::info!(
                session_id,
                bookmark_id = %session.bookmark_id,
                "Backend ended capture session"
            );
            if session.local_url.is_some() {
                if let Err(e) = self
                    .bookmarks
                    .update_url(&session.bookmark_id, &session.original_url)
                    .await
                {
                    tracing::warn!(session_id, error = %e, "Failed to restore bookmark");
                }
                for &tab_id in &session.tab_ids {
                    if let Err(e) = self.tabs.reload(tab_id).await {
                        tracing::debug!(tab_id, error = %e, "Failed to reload tab");
                    }
                }
            }
        }

        // Actions queued while draining run behind the ones already queued
        loop {
            let next = self.registry.lock().next_finish_action(&session.bookmark_id);
            let Some(action) = next else {
                break;
            };
            action().await;
        }

        let path = self.bookmark_path(&session.bookmark_id).await;
        if path.in_library {
            if let Err(e) = self.backend.update_search_index(&path.path).await {
                tracing::warn!(session_id, error = %e, "Failed to update search index");
            }
        }
    }

    /// Remove `tab_id` from its session, stopping the session if it was the
    /// last tab.
    pub async fn detach_tab(&self, tab_id: TabId) -> Option<Session> {
        let detached = self.registry.lock().detach_tab(tab_id)?;

        tracing::debug!(
            session_id = detached.session.id,
            tab_id,
            stopping = detached.stopping,
            "Detached tab"
        );

        if detached.stopping {
            self.stop_session(&detached.session, &[tab_id]).await;
        }
        Some(detached.session)
    }

    /// Stop the bookmark's session regardless of its tabs. Returns false if
    /// there was no live session.
    pub async fn stop_bookmark(&self, bookmark_id: &str) -> bool {
        let stopped = self.registry.lock().stop_bookmark(bookmark_id);
        let Some(stopped) = stopped else {
            return false;
        };

        self.stop_session(&stopped.session, &stopped.released_tabs)
            .await;
        true
    }

    async fn stop_session(&self, session: &Session, tabs: &[TabId]) {
        tracing::info!(
            session_id = session.id,
            bookmark_id = %session.bookmark_id,
            "Stopping capture session"
        );

        if session.local_url.is_some() {
            if let Err(e) = self
                .bookmarks
                .update_url(&session.bookmark_id, &session.original_url)
                .await
            {
                tracing::warn!(session_id = session.id, error = %e, "Failed to restore bookmark");
            }
        }

        if let Err(e) = self.backend.stop_recording(session.id).await {
            tracing::warn!(session_id = session.id, error = %e, "Failed to stop recording");
        }

        for tab_id in tabs {
            // The tab may already be closed
            if let Err(e) = self.tabs.reload(*tab_id).await {
                tracing::debug!(tab_id, error = %e, "Failed to reload tab");
            }
        }
    }

    /// Run `action` once the bookmark's session has finished, or right away
    /// if it has none.
    pub async fn enqueue_after_finish(&self, bookmark_id: &str, action: FinishAction) -> FinishHandle {
        let queued = self.registry.lock().enqueue_after_finish(bookmark_id, action);
        match queued {
            Ok(handle) => handle,
            Err(action) => {
                action().await;
                FinishHandle::completed()
            }
        }
    }

    // ---- Subscribers and queries ----

    /// Receive the bookmark's progress lines. `None` if it has no session.
    pub fn subscribe(&self, bookmark_id: &str, handler: Subscriber) -> Option<SubscriberId> {
        self.registry.lock().subscribe(bookmark_id, handler)
    }

    pub fn unsubscribe(&self, bookmark_id: &str, subscriber_id: SubscriberId) -> bool {
        self.registry.lock().unsubscribe(bookmark_id, subscriber_id)
    }

    pub fn event_log(&self, bookmark_id: &str) -> Option<Vec<String>> {
        self.registry
            .lock()
            .by_bookmark(bookmark_id)
            .map(|s| s.event_log)
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.registry.lock().sessions()
    }

    pub fn session_for_tab(&self, tab_id: TabId) -> Option<Session> {
        self.registry.lock().by_tab(tab_id)
    }

    pub fn session_for_bookmark(&self, bookmark_id: &str) -> Option<Session> {
        self.registry.lock().by_bookmark(bookmark_id)
    }

    /// The session serving from the origin of `url`, live or stopping.
    pub(crate) fn session_serving(&self, url: &str) -> Option<Session> {
        let origin = origin_of(url)?;
        self.sessions().into_iter().find(|s| {
            s.local_url
                .as_deref()
                .and_then(origin_of)
                .is_some_and(|o| o == origin)
        })
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    // ---- Tabs and history ----

    pub async fn handle_tab_removed(&self, tab_id: TabId) {
        self.detach_tab(tab_id).await;
    }

    /// Send a tab that landed on the address of an ended session back to
    /// the live site.
    pub async fn handle_tab_updated(&self, tab_id: TabId, url: &str) -> Result<()> {
        if !self.translator.is_local(url) {
            return Ok(());
        }
        if self.session_serving(url).is_some_and(|s| s.state.is_live()) {
            return Ok(());
        }

        let original = self.history_url(url);
        if original != url {
            tracing::debug!(tab_id, url = %url, original = %original, "Leaving ended capture");
            self.tabs.update_url(tab_id, &original).await?;
        }
        Ok(())
    }

    /// Address to keep in history for a visited `url`.
    pub fn history_url(&self, url: &str) -> String {
        self.translator.to_original(url, &self.recent)
    }

    pub fn recent_sessions(&self) -> Vec<RecentSessionEntry> {
        self.recent.entries()
    }

    // ---- Bypass hosts ----

    pub fn bypass_hosts(&self) -> Vec<String> {
        self.bypass.read().hosts()
    }

    pub fn set_bypass_hosts(&self, hosts: Vec<String>) -> Result<()> {
        self.bypass.write().set_hosts(hosts);
        self.persist_bypass_hosts()
    }

    pub fn add_bypass_host(&self, host: &str) -> Result<bool> {
        let added = self.bypass.write().insert(host);
        if added {
            self.persist_bypass_hosts()?;
        }
        Ok(added)
    }

    pub fn remove_bypass_host(&self, host: &str) -> Result<bool> {
        let removed = self.bypass.write().remove(host);
        if removed {
            self.persist_bypass_hosts()?;
        }
        Ok(removed)
    }

    fn persist_bypass_hosts(&self) -> Result<()> {
        let hosts = self.bypass.read().hosts();
        self.db.set_json(BYPASS_HOSTS_KEY, &hosts)?;
        Ok(())
    }
}
