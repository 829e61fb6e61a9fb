//! Host browser tab manager

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use stash_session::TabId;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: TabId,
    pub url: String,
}

/// Tab operations the router needs from the embedding browser. Operations on
/// a tab that has since closed should fail with `CoreError::Host`; the router
/// tolerates that.
#[async_trait]
pub trait TabHost: Send + Sync {
    /// All open tabs.
    async fn query(&self) -> Result<Vec<TabInfo>>;

    async fn reload(&self, tab_id: TabId) -> Result<()>;

    async fn update_url(&self, tab_id: TabId, url: &str) -> Result<()>;
}
