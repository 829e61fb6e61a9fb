//! Bookmark nodes and the host store boundary

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub type BookmarkId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    #[serde(alias = "bookmark")]
    Leaf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkNode {
    pub id: BookmarkId,
    #[serde(default)]
    pub parent_id: Option<BookmarkId>,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub url: Option<String>,
}

impl BookmarkNode {
    pub fn folder(id: &str, parent_id: Option<&str>, title: &str) -> Self {
        Self {
            id: id.to_string(),
            parent_id: parent_id.map(str::to_string),
            title: title.to_string(),
            kind: NodeKind::Folder,
            url: None,
        }
    }

    pub fn leaf(id: &str, parent_id: &str, title: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            parent_id: Some(parent_id.to_string()),
            title: title.to_string(),
            kind: NodeKind::Leaf,
            url: Some(url.to_string()),
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }
}

/// The host browser's bookmark store.
///
/// `get` returns `Ok(None)` for ids that no longer exist; errors are reserved
/// for the store itself failing.
#[async_trait]
pub trait BookmarkStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<BookmarkNode>>;

    /// The node and all of its descendants, in any order.
    async fn get_subtree(&self, id: &str) -> Result<Vec<BookmarkNode>>;

    async fn children(&self, id: &str) -> Result<Vec<BookmarkNode>>;

    /// Top-level folders (toolbar, menu, other) under the store's root.
    async fn base_folders(&self) -> Result<Vec<BookmarkNode>>;

    async fn create_folder(&self, parent_id: &str, title: &str) -> Result<BookmarkNode>;

    async fn update_url(&self, id: &str, url: &str) -> Result<()>;
}
