//! Request routing
//!
//! Decides, per intercepted request, whether it goes to the live site, is
//! redirected to a capture session, or is cancelled.

use std::time::Duration;
use tokio::sync::watch;

use stash_library::BookmarkId;
use stash_session::{AttachOutcome, Session, SessionError, SessionState, TabId};

use crate::error::CoreError;
use crate::router::CaptureRouter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    pub url: String,
    /// `None` for requests without a visible tab
    pub tab_id: Option<TabId>,
    /// Address of the document that issued a sub-resource request
    pub document_url: Option<String>,
    pub top_level: bool,
}

impl InterceptedRequest {
    pub fn navigation(tab_id: TabId, url: &str) -> Self {
        Self {
            url: url.to_string(),
            tab_id: Some(tab_id),
            document_url: None,
            top_level: true,
        }
    }

    pub fn resource(tab_id: TabId, url: &str, document_url: &str) -> Self {
        Self {
            url: url.to_string(),
            tab_id: Some(tab_id),
            document_url: Some(document_url.to_string()),
            top_level: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestVerdict {
    Pass,
    Cancel,
    Redirect(String),
}

impl CaptureRouter {
    pub async fn handle_request(&self, request: &InterceptedRequest) -> RequestVerdict {
        let Some(tab_id) = request.tab_id else {
            return RequestVerdict::Pass;
        };

        if request.top_level {
            self.route_navigation(tab_id, &request.url).await
        } else {
            self.route_resource(tab_id, request)
        }
    }

    async fn route_navigation(&self, tab_id: TabId, url: &str) -> RequestVerdict {
        let original_url = self.history_url(url);
        let target = self.find_bookmark(&original_url);

        let mut session = self.session_for_tab(tab_id);
        if let Some(current) = &session {
            let still_matches = target
                .as_ref()
                .is_some_and(|(bookmark_id, _)| *bookmark_id == current.bookmark_id);
            if !still_matches {
                self.detach_tab(tab_id).await;
                session = None;
            }
        }

        if session.is_none() && !self.translator.is_local(url) {
            if let Some((bookmark_id, bookmark_url)) = &target {
                match self.join_session(bookmark_id, bookmark_url, tab_id).await {
                    Some(joined) => session = Some(joined),
                    None => return RequestVerdict::Cancel,
                }
            }
        }

        let Some(session) = session else {
            return RequestVerdict::Pass;
        };
        let Some(local_url) = session.serving_url() else {
            return RequestVerdict::Pass;
        };

        let rewritten = self
            .translator
            .to_local(&original_url, &session.original_url, local_url);
        if rewritten != url {
            tracing::debug!(tab_id, from = %url, to = %rewritten, "Redirecting navigation");
            RequestVerdict::Redirect(rewritten)
        } else {
            RequestVerdict::Pass
        }
    }

    fn route_resource(&self, tab_id: TabId, request: &InterceptedRequest) -> RequestVerdict {
        let Some(document_url) = request.document_url.as_deref() else {
            return RequestVerdict::Pass;
        };
        if !self.translator.is_local(document_url) || self.translator.is_local(&request.url) {
            return RequestVerdict::Pass;
        }

        if self.bypass.read().matches(&request.url) {
            return RequestVerdict::Pass;
        }

        let session = self
            .session_for_tab(tab_id)
            .or_else(|| self.session_serving(document_url));
        let Some(session) = session else {
            return RequestVerdict::Pass;
        };

        if session.state == SessionState::Finishing {
            return RequestVerdict::Cancel;
        }
        let Some(local_url) = session.local_url.as_deref() else {
            return RequestVerdict::Pass;
        };

        let rewritten = self
            .translator
            .to_local(&request.url, &session.original_url, local_url);
        if rewritten != request.url {
            RequestVerdict::Redirect(rewritten)
        } else {
            RequestVerdict::Pass
        }
    }

    /// The bookmark an original-form address belongs to: a running session
    /// first, then the library leaves.
    fn find_bookmark(&self, url: &str) -> Option<(BookmarkId, String)> {
        if let Some(session) = self.registry.lock().find_by_url(url) {
            return Some((session.bookmark_id, session.bookmark_url));
        }

        let mirror = self.mirror();
        let leaf = mirror.find_leaf_by_url(url)?;
        Some((leaf.id.clone(), leaf.url.clone()?))
    }

    /// Attach the tab to the bookmark's session, creating it if needed, and
    /// wait until the backend serves it. `None` if that did not happen in
    /// time; the tab is left detached.
    async fn join_session(
        &self,
        bookmark_id: &str,
        bookmark_url: &str,
        tab_id: TabId,
    ) -> Option<Session> {
        let session = loop {
            let outcome = self.registry.lock().attach_tab(bookmark_id, tab_id);
            match outcome {
                Ok(AttachOutcome::Attached(session)) => break session,
                Ok(AttachOutcome::Vacant) => {
                    match self.create(bookmark_id, bookmark_url, tab_id).await {
                        Ok(session) => break session,
                        // Another navigation created it first
                        Err(CoreError::Session(SessionError::BookmarkBusy(_))) => continue,
                        Err(e) => {
                            tracing::warn!(bookmark_id = %bookmark_id, tab_id, error = %e, "Failed to create session");
                            return None;
                        }
                    }
                }
                Ok(AttachOutcome::Draining(rx)) => {
                    if !wait_closed(rx, self.config.drain_timeout()).await {
                        tracing::warn!(bookmark_id = %bookmark_id, tab_id, "Session did not stop in time");
                        return None;
                    }
                }
                Err(e) => {
                    tracing::warn!(bookmark_id = %bookmark_id, tab_id, error = %e, "Cannot attach tab");
                    return None;
                }
            }
        };

        if session.local_url.is_some() {
            return Some(session);
        }

        let rx = self.registry.lock().watch(bookmark_id)?;
        let accepted = wait_accepted(rx, self.config.accept_timeout()).await;

        let current = self.session_for_tab(tab_id).filter(|s| s.id == session.id);
        match (accepted, current) {
            (Some(true), Some(current)) => Some(current),
            (None, _) => {
                tracing::warn!(
                    session_id = session.id,
                    tab_id,
                    "Backend did not accept in time, cancelling navigation"
                );
                self.detach_tab(tab_id).await;
                None
            }
            _ => None,
        }
    }
}

/// Wait until the session leaves the table. False on timeout.
async fn wait_closed(mut rx: watch::Receiver<SessionState>, limit: Duration) -> bool {
    tokio::time::timeout(limit, async move { while rx.changed().await.is_ok() {} })
        .await
        .is_ok()
}

/// `Some(true)` once the session is active, `Some(false)` if it stopped or
/// went away first, `None` on timeout.
async fn wait_accepted(mut rx: watch::Receiver<SessionState>, limit: Duration) -> Option<bool> {
    tokio::time::timeout(limit, async move {
        loop {
            let state = *rx.borrow_and_update();
            match state {
                SessionState::Active => return true,
                SessionState::Finishing => return false,
                SessionState::Starting => {}
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    })
    .await
    .ok()
}
