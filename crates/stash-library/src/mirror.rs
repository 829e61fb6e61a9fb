//! Bookmark Mirror
//!
//! An id -> node arena of the library subtree. A mirror is immutable once
//! built; the router swaps in a fresh one after every bookmark mutation, so
//! readers can hold an `Arc<BookmarkMirror>` across awaits.

use std::collections::HashMap;

use crate::node::{BookmarkId, BookmarkNode, BookmarkStore, NodeKind};
use crate::Result;

/// Upper bound on ancestor walks; deeper chains are treated as outside the
/// library.
pub const MAX_PATH_DEPTH: usize = 64;

/// Archive location of a bookmark, relative to the library root.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BookmarkPath {
    pub path: Vec<String>,
    pub in_library: bool,
}

impl BookmarkPath {
    pub fn outside(path: Vec<String>) -> Self {
        Self {
            path,
            in_library: false,
        }
    }

    /// The path of a child named `title` below this one.
    pub fn child(mut self, title: &str) -> Self {
        self.path.push(title.to_string());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct BookmarkMirror {
    root_id: Option<BookmarkId>,
    nodes: HashMap<BookmarkId, BookmarkNode>,
}

impl BookmarkMirror {
    pub fn new(root_id: Option<BookmarkId>) -> Self {
        Self {
            root_id,
            nodes: HashMap::new(),
        }
    }

    /// Build a mirror from a flat subtree listing. Nodes whose parent chain
    /// does not reach the root inside the listing are dropped.
    pub fn from_nodes(root_id: &str, nodes: Vec<BookmarkNode>) -> Self {
        let all: HashMap<BookmarkId, BookmarkNode> =
            nodes.into_iter().map(|n| (n.id.clone(), n)).collect();

        let reachable: HashMap<BookmarkId, BookmarkNode> = all
            .iter()
            .filter(|(id, _)| reaches_root(&all, id, root_id))
            .map(|(id, node)| (id.clone(), node.clone()))
            .collect();

        Self {
            root_id: Some(root_id.to_string()),
            nodes: reachable,
        }
    }

    /// Fetch the library subtree from the store.
    pub async fn load(store: &dyn BookmarkStore, root_id: &str) -> Result<Self> {
        let nodes = store.get_subtree(root_id).await?;
        let mirror = Self::from_nodes(root_id, nodes);

        tracing::debug!(
            root_id = %root_id,
            node_count = mirror.nodes.len(),
            "Rebuilt bookmark mirror"
        );

        Ok(mirror)
    }

    pub fn root_id(&self) -> Option<&str> {
        self.root_id.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&BookmarkNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Title as of the last rebuild.
    pub fn title_of(&self, id: &str) -> Option<&str> {
        self.nodes.get(id).map(|n| n.title.as_str())
    }

    /// Leaves with an address, excluding the root itself.
    pub fn leaves(&self) -> impl Iterator<Item = &BookmarkNode> {
        self.nodes
            .values()
            .filter(|n| n.kind == NodeKind::Leaf && n.url.as_deref().is_some_and(|u| !u.is_empty()))
    }

    /// The library leaf whose address is the longest prefix of `url`, after
    /// normalization. Ties go to the smallest id so results are stable.
    pub fn find_leaf_by_url(&self, url: &str) -> Option<&BookmarkNode> {
        let target = normalize_url(url);

        self.leaves()
            .filter_map(|leaf| {
                let prefix = normalize_url(leaf.url.as_deref()?);
                target.starts_with(&prefix).then_some((prefix.len(), leaf))
            })
            .max_by(|(a_len, a), (b_len, b)| a_len.cmp(b_len).then_with(|| b.id.cmp(&a.id)))
            .map(|(_, leaf)| leaf)
    }

    /// Walk ancestors of `id` up to the library root. Nodes missing from the
    /// snapshot are looked up in the store; a node that cannot be found ends
    /// the walk outside the library.
    pub async fn get_path(&self, store: &dyn BookmarkStore, id: &str) -> BookmarkPath {
        let mut titles = Vec::new();
        let mut current = id.to_string();

        for _ in 0..MAX_PATH_DEPTH {
            if self.root_id.as_deref() == Some(current.as_str()) {
                titles.reverse();
                return BookmarkPath {
                    path: titles,
                    in_library: true,
                };
            }

            let node = match self.nodes.get(&current) {
                Some(node) => Some(node.clone()),
                None => match store.get(&current).await {
                    Ok(node) => node,
                    Err(e) => {
                        tracing::warn!(bookmark_id = %current, error = %e, "Bookmark lookup failed");
                        None
                    }
                },
            };

            let Some(node) = node else {
                break;
            };

            titles.push(node.title);
            match node.parent_id {
                Some(parent_id) => current = parent_id,
                None => break,
            }
        }

        titles.reverse();
        BookmarkPath::outside(titles)
    }
}

fn reaches_root(nodes: &HashMap<BookmarkId, BookmarkNode>, id: &str, root_id: &str) -> bool {
    let mut current = id;
    for _ in 0..MAX_PATH_DEPTH {
        if current == root_id {
            return true;
        }
        match nodes.get(current).and_then(|n| n.parent_id.as_deref()) {
            Some(parent) => current = parent,
            None => return false,
        }
    }
    false
}

/// Strip the scheme and a leading `www.` so `http://www.a.com/x` and
/// `https://a.com/x` compare equal.
pub fn normalize_url(url: &str) -> String {
    let rest = match url.find("://") {
        Some(index) => &url[index + 3..],
        None => url,
    };
    rest.strip_prefix("www.").unwrap_or(rest).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct MemoryStore {
        nodes: Mutex<HashMap<String, BookmarkNode>>,
    }

    impl MemoryStore {
        fn new(nodes: Vec<BookmarkNode>) -> Self {
            Self {
                nodes: Mutex::new(nodes.into_iter().map(|n| (n.id.clone(), n)).collect()),
            }
        }
    }

    #[async_trait]
    impl BookmarkStore for MemoryStore {
        async fn get(&self, id: &str) -> Result<Option<BookmarkNode>> {
            Ok(self.nodes.lock().get(id).cloned())
        }

        async fn get_subtree(&self, id: &str) -> Result<Vec<BookmarkNode>> {
            let nodes = self.nodes.lock().values().cloned().collect::<Vec<_>>();
            let all: HashMap<_, _> = nodes.iter().map(|n| (n.id.clone(), n.clone())).collect();
            Ok(nodes
                .into_iter()
                .filter(|n| reaches_root(&all, &n.id, id))
                .collect())
        }

        async fn children(&self, id: &str) -> Result<Vec<BookmarkNode>> {
            Ok(self
                .nodes
                .lock()
                .values()
                .filter(|n| n.parent_id.as_deref() == Some(id))
                .cloned()
                .collect())
        }

        async fn base_folders(&self) -> Result<Vec<BookmarkNode>> {
            self.children("root").await
        }

        async fn create_folder(&self, parent_id: &str, title: &str) -> Result<BookmarkNode> {
            let node = BookmarkNode::folder(&format!("new-{title}"), Some(parent_id), title);
            self.nodes.lock().insert(node.id.clone(), node.clone());
            Ok(node)
        }

        async fn update_url(&self, id: &str, url: &str) -> Result<()> {
            if let Some(node) = self.nodes.lock().get_mut(id) {
                node.url = Some(url.to_string());
            }
            Ok(())
        }
    }

    fn sample_tree() -> Vec<BookmarkNode> {
        vec![
            BookmarkNode::folder("root", None, ""),
            BookmarkNode::folder("toolbar", Some("root"), "Toolbar"),
            BookmarkNode::folder("lib", Some("toolbar"), "Library"),
            BookmarkNode::folder("a", Some("lib"), "A"),
            BookmarkNode::leaf("b", "a", "B", "https://example.com/"),
            BookmarkNode::leaf("docs", "a", "Docs", "https://example.com/docs/"),
            BookmarkNode::leaf("outside", "toolbar", "News", "https://news.example.org/"),
        ]
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("https://www.example.com/a"), "example.com/a");
        assert_eq!(normalize_url("http://example.com/a"), "example.com/a");
        assert_eq!(normalize_url("example.com"), "example.com");
        assert_eq!(normalize_url("https://wwwexample.com"), "wwwexample.com");
    }

    #[test]
    fn test_from_nodes_keeps_only_library() {
        let mirror = BookmarkMirror::from_nodes("lib", sample_tree());
        assert!(mirror.contains("lib"));
        assert!(mirror.contains("b"));
        assert!(!mirror.contains("outside"));
        assert!(!mirror.contains("toolbar"));
        assert_eq!(mirror.title_of("a"), Some("A"));
    }

    #[test]
    fn test_find_leaf_prefers_longest_prefix() {
        let mirror = BookmarkMirror::from_nodes("lib", sample_tree());

        let hit = mirror.find_leaf_by_url("http://www.example.com/docs/intro").unwrap();
        assert_eq!(hit.id, "docs");

        let hit = mirror.find_leaf_by_url("https://example.com/blog").unwrap();
        assert_eq!(hit.id, "b");

        assert!(mirror.find_leaf_by_url("https://news.example.org/today").is_none());
    }

    #[tokio::test]
    async fn test_get_path_inside_library() {
        let store = MemoryStore::new(sample_tree());
        let mirror = BookmarkMirror::load(&store, "lib").await.unwrap();

        let path = mirror.get_path(&store, "b").await;
        assert_eq!(path.path, vec!["A", "B"]);
        assert!(path.in_library);

        let root = mirror.get_path(&store, "lib").await;
        assert!(root.path.is_empty());
        assert!(root.in_library);
    }

    #[tokio::test]
    async fn test_get_path_outside_library_uses_store() {
        let store = MemoryStore::new(sample_tree());
        let mirror = BookmarkMirror::load(&store, "lib").await.unwrap();

        let path = mirror.get_path(&store, "outside").await;
        assert_eq!(path.path, vec!["", "Toolbar", "News"]);
        assert!(!path.in_library);

        let missing = mirror.get_path(&store, "gone").await;
        assert!(missing.path.is_empty());
        assert!(!missing.in_library);
    }

    #[tokio::test]
    async fn test_get_path_bounded_on_cycles() {
        let store = MemoryStore::new(vec![
            BookmarkNode::folder("x", Some("y"), "X"),
            BookmarkNode::folder("y", Some("x"), "Y"),
        ]);
        let mirror = BookmarkMirror::new(Some("lib".to_string()));

        let path = mirror.get_path(&store, "x").await;
        assert!(!path.in_library);
        assert_eq!(path.path.len(), MAX_PATH_DEPTH);
    }
}
