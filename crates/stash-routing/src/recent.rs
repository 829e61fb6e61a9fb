//! Recent-session history
//!
//! Serving origins outlive their sessions: pages opened from a capture keep
//! pointing at `http://127.0.0.1:<port>` after the backend stopped serving
//! them. The log maps those origins back to the sites they stood for.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use stash_storage::Database;

use crate::translator::origin_of;
use crate::Result;

pub const RECENT_SESSIONS_KEY: &str = "recent-sessions";
pub const RECENT_SESSION_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentSessionEntry {
    /// Origin the backend served the session from
    pub local_origin: String,
    /// Bookmark address when the session started
    pub bookmark_url: String,
    /// Origin of the live site after any redirects
    #[serde(default, rename = "origin", skip_serializing_if = "Option::is_none")]
    pub current_origin: Option<String>,
}

impl RecentSessionEntry {
    pub fn new(local_origin: &str, bookmark_url: &str, current_origin: Option<String>) -> Self {
        Self {
            local_origin: local_origin.trim_end_matches('/').to_string(),
            bookmark_url: bookmark_url.to_string(),
            current_origin,
        }
    }

    /// The origin local addresses translate back to.
    pub fn origin(&self) -> Option<String> {
        self.current_origin
            .as_deref()
            .and_then(origin_of)
            .or_else(|| origin_of(&self.bookmark_url))
    }
}

pub struct RecentSessions {
    /// Most recent first
    entries: Arc<RwLock<Vec<RecentSessionEntry>>>,
    db: Database,
    limit: usize,
}

impl RecentSessions {
    /// Load the persisted log.
    pub fn load(db: Database) -> Result<Self> {
        Self::load_with_limit(db, RECENT_SESSION_LIMIT)
    }

    pub fn load_with_limit(db: Database, limit: usize) -> Result<Self> {
        let mut entries: Vec<RecentSessionEntry> =
            db.get_json(RECENT_SESSIONS_KEY)?.unwrap_or_default();
        entries.truncate(limit);

        tracing::debug!(count = entries.len(), "Loaded recent sessions");

        Ok(Self {
            entries: Arc::new(RwLock::new(entries)),
            db,
            limit,
        })
    }

    pub fn entries(&self) -> Vec<RecentSessionEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Put `entry` at the front, replacing any entry for the same local
    /// origin, and drop the oldest beyond the limit.
    pub fn record(&self, entry: RecentSessionEntry) -> Result<()> {
        let snapshot = {
            let mut entries = self.entries.write();
            entries.retain(|e| e.local_origin != entry.local_origin);
            entries.insert(0, entry);
            entries.truncate(self.limit);
            entries.clone()
        };
        self.persist(&snapshot)
    }

    /// Track a redirect of the live site. Returns false if no entry exists
    /// for `local_origin`.
    pub fn refresh_origin(&self, local_origin: &str, current_origin: &str) -> Result<bool> {
        let local_origin = local_origin.trim_end_matches('/');
        let snapshot = {
            let mut entries = self.entries.write();
            let Some(entry) = entries.iter_mut().find(|e| e.local_origin == local_origin) else {
                return Ok(false);
            };
            entry.current_origin = Some(current_origin.to_string());
            entries.clone()
        };
        self.persist(&snapshot)?;
        Ok(true)
    }

    /// The entry whose local origin prefixes `url` on an origin boundary.
    pub fn find(&self, url: &str) -> Option<RecentSessionEntry> {
        self.entries
            .read()
            .iter()
            .find(|e| {
                url.strip_prefix(&e.local_origin)
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with(['/', '?', '#']))
            })
            .cloned()
    }

    pub fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        self.persist(&[])
    }

    fn persist(&self, entries: &[RecentSessionEntry]) -> Result<()> {
        self.db.set_json(RECENT_SESSIONS_KEY, entries)?;
        Ok(())
    }
}

impl Clone for RecentSessions {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            db: self.db.clone(),
            limit: self.limit,
        }
    }
}
