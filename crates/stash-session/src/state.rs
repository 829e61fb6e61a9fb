//! Session State Machine
//!
//! ```text
//! Starting   backend start issued, no serving address yet
//!   ↓ ACCEPT
//! Active     serving address known
//!   ↓ last tab detached / bookmark removed
//! Finishing  stop issued, waiting for the backend to finish
//!   ↓ terminal event
//! (removed)
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Starting,
    Active,
    Finishing,
}

impl SessionState {
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        match (self, target) {
            (SessionState::Starting, SessionState::Active) => true,
            // A repeated ACCEPT keeps the session active
            (SessionState::Active, SessionState::Active) => true,
            // Stopping before the backend accepted is allowed
            (SessionState::Starting, SessionState::Finishing) => true,
            (SessionState::Active, SessionState::Finishing) => true,
            (SessionState::Finishing, SessionState::Finishing) => true,
            _ => false,
        }
    }

    /// Still accepting tabs.
    pub fn is_live(&self) -> bool {
        !matches!(self, SessionState::Finishing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Finishing => "finishing",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
