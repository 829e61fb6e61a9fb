//! Session Registry
//!
//! The in-memory table of live sessions, indexed by bookmark, tab and
//! session id. All methods are synchronous and leave the table consistent on
//! return; the router wraps the table in a lock and performs the backend and
//! host side effects between calls.

use futures_util::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

use stash_library::{normalize_url, BookmarkId};

use crate::error::SessionError;
use crate::session::{Session, SessionId, TabId};
use crate::state::SessionState;
use crate::Result;

/// Receives progress lines of one session. Returning an error unsubscribes.
pub type Subscriber = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

pub type SubscriberId = u64;

/// Work deferred until a bookmark's session has finished.
pub type FinishAction = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Resolves once a deferred action has run.
#[derive(Debug)]
pub struct FinishHandle {
    rx: Option<oneshot::Receiver<()>>,
}

impl FinishHandle {
    pub fn completed() -> Self {
        Self { rx: None }
    }

    /// False if the action was still queued when this handle was created.
    pub fn is_completed(&self) -> bool {
        self.rx.is_none()
    }

    /// Wait for the action. Returns false if it was dropped without running.
    pub async fn wait(self) -> bool {
        match self.rx {
            None => true,
            Some(rx) => rx.await.is_ok(),
        }
    }
}

pub enum AttachOutcome {
    Attached(Session),
    /// No session exists for the bookmark; the caller should create one
    Vacant,
    /// The bookmark's session is stopping; wait for the receiver to close
    /// before creating a new one
    Draining(watch::Receiver<SessionState>),
}

/// A tab left its session.
#[derive(Debug, Clone)]
pub struct Detached {
    pub session: Session,
    /// The last tab left and the session moved to Finishing
    pub stopping: bool,
}

/// A session was stopped regardless of its tabs.
#[derive(Debug, Clone)]
pub struct Stopped {
    pub session: Session,
    pub released_tabs: Vec<TabId>,
}

/// A session reached its terminal event and left the table. Its queued
/// actions are drained with `next_finish_action`.
#[derive(Debug, Clone)]
pub struct Finished {
    pub session: Session,
    /// The session was not stopped from this side
    pub unexpected: bool,
    pub pending: usize,
}

struct SessionEntry {
    session: Session,
    subscribers: Vec<(SubscriberId, Subscriber)>,
    pending: VecDeque<FinishAction>,
    /// Dropped with the entry, which wakes everyone waiting for removal
    state_tx: watch::Sender<SessionState>,
}

/// Actions of a finished session that have not run yet. The bookmark stays
/// busy until the queue is empty.
struct DrainQueue {
    pending: VecDeque<FinishAction>,
    /// Dropped once drained, which wakes everyone waiting to reuse the bookmark
    state_tx: watch::Sender<SessionState>,
}

impl SessionEntry {
    fn set_state(&mut self, state: SessionState) -> Result<()> {
        self.session.transition_to(state)?;
        self.state_tx.send_replace(state);
        Ok(())
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    entries: HashMap<BookmarkId, SessionEntry>,
    draining: HashMap<BookmarkId, DrainQueue>,
    by_tab: HashMap<TabId, BookmarkId>,
    by_id: HashMap<SessionId, BookmarkId>,
    last_session_id: SessionId,
    last_subscriber_id: SubscriberId,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a Starting session for `bookmark_id` with `tab_id` attached.
    pub fn create(&mut self, bookmark_id: &str, url: &str, tab_id: TabId) -> Result<Session> {
        if self.entries.contains_key(bookmark_id) || self.draining.contains_key(bookmark_id) {
            return Err(SessionError::BookmarkBusy(bookmark_id.to_string()));
        }
        if self.by_tab.contains_key(&tab_id) {
            return Err(SessionError::TabBusy(tab_id));
        }

        self.last_session_id += 1;
        let session = Session::new(
            self.last_session_id,
            bookmark_id.to_string(),
            url.to_string(),
            tab_id,
        );
        let (state_tx, _) = watch::channel(session.state);

        self.by_tab.insert(tab_id, bookmark_id.to_string());
        self.by_id.insert(session.id, bookmark_id.to_string());
        self.entries.insert(
            bookmark_id.to_string(),
            SessionEntry {
                session: session.clone(),
                subscribers: Vec::new(),
                pending: VecDeque::new(),
                state_tx,
            },
        );

        tracing::info!(
            session_id = session.id,
            bookmark_id = %bookmark_id,
            tab_id,
            "Created capture session"
        );

        Ok(session)
    }

    pub fn attach_tab(&mut self, bookmark_id: &str, tab_id: TabId) -> Result<AttachOutcome> {
        if let Some(owner) = self.by_tab.get(&tab_id) {
            if owner != bookmark_id {
                return Err(SessionError::TabBusy(tab_id));
            }
        }

        if let Some(queue) = self.draining.get(bookmark_id) {
            return Ok(AttachOutcome::Draining(queue.state_tx.subscribe()));
        }

        let Some(entry) = self.entries.get_mut(bookmark_id) else {
            return Ok(AttachOutcome::Vacant);
        };

        if !entry.session.state.is_live() {
            return Ok(AttachOutcome::Draining(entry.state_tx.subscribe()));
        }

        entry.session.add_tab(tab_id);
        self.by_tab.insert(tab_id, bookmark_id.to_string());

        tracing::debug!(
            session_id = entry.session.id,
            tab_id,
            tab_count = entry.session.tab_ids.len(),
            "Attached tab to capture session"
        );

        Ok(AttachOutcome::Attached(entry.session.clone()))
    }

    /// Remove `tab_id` from its session. Emptying a live session moves it to
    /// Finishing; the entry stays until `finish`.
    pub fn detach_tab(&mut self, tab_id: TabId) -> Option<Detached> {
        let bookmark_id = self.by_tab.remove(&tab_id)?;
        let entry = self.entries.get_mut(&bookmark_id)?;

        entry.session.remove_tab(tab_id);
        let stopping = entry.session.tab_ids.is_empty() && entry.session.state.is_live();
        if stopping {
            if let Err(e) = entry.set_state(SessionState::Finishing) {
                tracing::warn!(session_id = entry.session.id, error = %e, "Cannot stop session");
            }
        }

        Some(Detached {
            session: entry.session.clone(),
            stopping,
        })
    }

    /// Move a live session to Finishing and release all of its tabs.
    pub fn stop_bookmark(&mut self, bookmark_id: &str) -> Option<Stopped> {
        let entry = self.entries.get_mut(bookmark_id)?;
        if !entry.session.state.is_live() {
            return None;
        }

        let released_tabs = std::mem::take(&mut entry.session.tab_ids);
        for tab_id in &released_tabs {
            self.by_tab.remove(tab_id);
        }
        if let Err(e) = entry.set_state(SessionState::Finishing) {
            tracing::warn!(session_id = entry.session.id, error = %e, "Cannot stop session");
            return None;
        }

        Some(Stopped {
            session: entry.session.clone(),
            released_tabs,
        })
    }

    /// Record the serving address. Returns the session and whether this was
    /// the first ACCEPT; None if the session is gone or already stopping.
    pub fn accept(&mut self, session_id: SessionId, local_url: &str) -> Option<(Session, bool)> {
        let entry = self.entry_by_id_mut(session_id)?;

        if let Err(e) = entry.set_state(SessionState::Active) {
            tracing::debug!(session_id, error = %e, "Ignoring ACCEPT");
            return None;
        }

        let first = entry.session.local_url.is_none();
        if first {
            entry.session.local_url = Some(local_url.to_string());
        } else if entry.session.local_url.as_deref() != Some(local_url) {
            tracing::warn!(
                session_id,
                local_url = %local_url,
                "Session already has a serving address"
            );
        }

        Some((entry.session.clone(), first))
    }

    pub fn redirect(&mut self, session_id: SessionId, url: &str) -> Option<Session> {
        let entry = self.entry_by_id_mut(session_id)?;
        entry.session.original_url = url.to_string();
        Some(entry.session.clone())
    }

    /// Append a progress line and return the subscribers to notify.
    pub fn record_event(
        &mut self,
        session_id: SessionId,
        event: &str,
    ) -> Option<Vec<(SubscriberId, Subscriber)>> {
        let entry = self.entry_by_id_mut(session_id)?;
        entry.session.event_log.push(event.to_string());
        Some(entry.subscribers.clone())
    }

    pub fn subscribe(&mut self, bookmark_id: &str, subscriber: Subscriber) -> Option<SubscriberId> {
        let entry = self.entries.get_mut(bookmark_id)?;
        self.last_subscriber_id += 1;
        entry.subscribers.push((self.last_subscriber_id, subscriber));
        Some(self.last_subscriber_id)
    }

    pub fn unsubscribe(&mut self, bookmark_id: &str, subscriber_id: SubscriberId) -> bool {
        let Some(entry) = self.entries.get_mut(bookmark_id) else {
            return false;
        };
        let before = entry.subscribers.len();
        entry.subscribers.retain(|(id, _)| *id != subscriber_id);
        entry.subscribers.len() != before
    }

    pub fn remove_subscribers(&mut self, session_id: SessionId, failed: &[SubscriberId]) {
        if failed.is_empty() {
            return;
        }
        if let Some(entry) = self.entry_by_id_mut(session_id) {
            entry.subscribers.retain(|(id, _)| !failed.contains(id));
        }
    }

    /// Queue `action` behind the bookmark's session, or behind the actions
    /// of a finished session that are still running. Hands the action back
    /// if neither exists, so the caller can run it right away.
    pub fn enqueue_after_finish(
        &mut self,
        bookmark_id: &str,
        action: FinishAction,
    ) -> std::result::Result<FinishHandle, FinishAction> {
        let pending = match self.entries.get_mut(bookmark_id) {
            Some(entry) => &mut entry.pending,
            None => match self.draining.get_mut(bookmark_id) {
                Some(queue) => &mut queue.pending,
                None => return Err(action),
            },
        };

        let (tx, rx) = oneshot::channel();
        pending.push_back(Box::new(move || {
            Box::pin(async move {
                action().await;
                let _ = tx.send(());
            })
        }));

        tracing::debug!(
            bookmark_id = %bookmark_id,
            queued = pending.len(),
            "Deferred action until session finishes"
        );

        Ok(FinishHandle { rx: Some(rx) })
    }

    /// Next queued action of a finished session. Returns None and frees the
    /// bookmark once the queue is empty.
    pub fn next_finish_action(&mut self, bookmark_id: &str) -> Option<FinishAction> {
        let queue = self.draining.get_mut(bookmark_id)?;
        match queue.pending.pop_front() {
            Some(action) => Some(action),
            None => {
                self.draining.remove(bookmark_id);
                None
            }
        }
    }

    /// True while a finished session's actions are still running.
    pub fn is_draining(&self, bookmark_id: &str) -> bool {
        self.draining.contains_key(bookmark_id)
    }

    /// Remove the session on its terminal event.
    pub fn finish(&mut self, session_id: SessionId) -> Option<Finished> {
        let bookmark_id = self.by_id.remove(&session_id)?;
        let entry = self.entries.remove(&bookmark_id)?;

        self.by_tab.retain(|_, owner| *owner != bookmark_id);

        let pending = entry.pending.len();
        tracing::info!(
            session_id,
            bookmark_id = %bookmark_id,
            pending,
            "Capture session finished"
        );

        if pending > 0 {
            self.draining.insert(
                bookmark_id,
                DrainQueue {
                    pending: entry.pending,
                    state_tx: entry.state_tx,
                },
            );
        }

        Some(Finished {
            unexpected: entry.session.state.is_live(),
            session: entry.session,
            pending,
        })
    }

    pub fn by_tab(&self, tab_id: TabId) -> Option<Session> {
        let bookmark_id = self.by_tab.get(&tab_id)?;
        self.by_bookmark(bookmark_id)
    }

    pub fn by_bookmark(&self, bookmark_id: &str) -> Option<Session> {
        self.entries.get(bookmark_id).map(|e| e.session.clone())
    }

    pub fn by_id(&self, session_id: SessionId) -> Option<Session> {
        let bookmark_id = self.by_id.get(&session_id)?;
        self.by_bookmark(bookmark_id)
    }

    /// The live session whose bookmark address is the longest prefix of
    /// `url`, after normalization.
    pub fn find_by_url(&self, url: &str) -> Option<Session> {
        let target = normalize_url(url);

        self.entries
            .values()
            .map(|e| &e.session)
            .filter(|s| s.state.is_live())
            .filter_map(|s| {
                let prefix = normalize_url(&s.bookmark_url);
                target.starts_with(&prefix).then_some((prefix.len(), s))
            })
            .max_by(|(a_len, a), (b_len, b)| a_len.cmp(b_len).then_with(|| b.id.cmp(&a.id)))
            .map(|(_, s)| s.clone())
    }

    pub fn watch(&self, bookmark_id: &str) -> Option<watch::Receiver<SessionState>> {
        self.entries.get(bookmark_id).map(|e| e.state_tx.subscribe())
    }

    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.entries.values().map(|e| e.session.clone()).collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_by_id_mut(&mut self, session_id: SessionId) -> Option<&mut SessionEntry> {
        let bookmark_id = self.by_id.get(&session_id)?;
        self.entries.get_mut(bookmark_id)
    }
}
