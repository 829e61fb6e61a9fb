//! Session data structure

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stash_library::BookmarkId;

use crate::error::SessionError;
use crate::state::SessionState;
use crate::Result;

pub type SessionId = u64;
pub type TabId = i64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Backend recording id
    pub id: SessionId,
    pub bookmark_id: BookmarkId,
    /// Bookmark address when the session started; the stored address is
    /// rewritten to the serving address while the session runs
    pub bookmark_url: String,
    /// Live-site address; follows redirects reported by the backend
    pub original_url: String,
    /// Serving address, set once on ACCEPT
    pub local_url: Option<String>,
    /// Attached tabs, in attach order
    pub tab_ids: Vec<TabId>,
    /// Tab whose navigation created the session
    pub origin_tab: TabId,
    pub state: SessionState,
    /// Progress lines reported by the backend, oldest first
    pub event_log: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, bookmark_id: BookmarkId, url: String, tab_id: TabId) -> Self {
        let now = Utc::now();

        Self {
            id,
            bookmark_id,
            bookmark_url: url.clone(),
            original_url: url,
            local_url: None,
            tab_ids: vec![tab_id],
            origin_tab: tab_id,
            state: SessionState::Starting,
            event_log: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition_to(&mut self, new_state: SessionState) -> Result<()> {
        if !self.state.can_transition_to(new_state) {
            return Err(SessionError::InvalidTransition {
                from: self.state.to_string(),
                to: new_state.to_string(),
            });
        }

        if self.state != new_state {
            tracing::debug!(
                session_id = self.id,
                from = %self.state,
                to = %new_state,
                "Session state transition"
            );
        }

        self.state = new_state;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn add_tab(&mut self, tab_id: TabId) {
        if !self.tab_ids.contains(&tab_id) {
            self.tab_ids.push(tab_id);
            self.updated_at = Utc::now();
        }
    }

    /// Returns true if the tab was attached.
    pub fn remove_tab(&mut self, tab_id: TabId) -> bool {
        let before = self.tab_ids.len();
        self.tab_ids.retain(|id| *id != tab_id);
        self.updated_at = Utc::now();
        self.tab_ids.len() != before
    }

    pub fn has_tab(&self, tab_id: TabId) -> bool {
        self.tab_ids.contains(&tab_id)
    }

    /// Serving address, once the session is active.
    pub fn serving_url(&self) -> Option<&str> {
        match self.state {
            SessionState::Finishing => None,
            _ => self.local_url.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session() {
        let session = Session::new(1, "b1".to_string(), "https://example.com/".to_string(), 7);
        assert_eq!(session.state, SessionState::Starting);
        assert_eq!(session.tab_ids, vec![7]);
        assert_eq!(session.origin_tab, 7);
        assert_eq!(session.bookmark_url, session.original_url);
        assert!(session.serving_url().is_none());
    }

    #[test]
    fn test_tabs() {
        let mut session = Session::new(1, "b1".to_string(), "https://example.com/".to_string(), 7);
        session.add_tab(8);
        session.add_tab(8);
        assert_eq!(session.tab_ids, vec![7, 8]);

        assert!(session.remove_tab(7));
        assert!(!session.remove_tab(7));
        assert!(session.has_tab(8));
    }

    #[test]
    fn test_finishing_hides_serving_url() {
        let mut session = Session::new(1, "b1".to_string(), "https://example.com/".to_string(), 7);
        session.transition_to(SessionState::Active).unwrap();
        session.local_url = Some("http://127.0.0.1:9000".to_string());
        assert_eq!(session.serving_url(), Some("http://127.0.0.1:9000"));

        session.transition_to(SessionState::Finishing).unwrap();
        assert!(session.serving_url().is_none());
        assert!(session.transition_to(SessionState::Active).is_err());
    }
}
