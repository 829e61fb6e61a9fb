//! Path Synchronizer
//!
//! Keeps the archive layout in step with the bookmark tree. A bookmark's
//! archive path is the chain of folder titles from the library root down to
//! its own title, so renames and moves inside the library become file moves,
//! and leaving the library becomes a soft delete that re-entering undoes.
//!
//! Every archive operation waits until the bookmark's capture session, if
//! any, has finished writing.

use std::sync::Arc;

use stash_backend::Backend;
use stash_library::{BookmarkId, BookmarkNode};
use stash_session::FinishHandle;

use crate::router::CaptureRouter;
use crate::Result;

/// A mutation reported by the host bookmark store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookmarkEvent {
    Created {
        node: BookmarkNode,
    },
    Changed {
        id: BookmarkId,
        title: Option<String>,
        url: Option<String>,
    },
    Moved {
        id: BookmarkId,
        parent_id: BookmarkId,
        old_parent_id: BookmarkId,
    },
    Removed {
        id: BookmarkId,
        parent_id: BookmarkId,
        node: BookmarkNode,
    },
}

#[derive(Debug)]
enum ArchiveOp {
    Move { from: Vec<String>, to: Vec<String> },
    Delete { path: Vec<String>, undelete_id: String },
    Undelete { undelete_id: String },
}

impl ArchiveOp {
    async fn apply(self, backend: &dyn Backend) {
        tracing::info!(op = ?self, "Updating archive");
        let result = match &self {
            ArchiveOp::Move { from, to } => backend.move_file(from, to).await,
            ArchiveOp::Delete { path, undelete_id } => {
                backend.delete_file(path, Some(undelete_id.as_str())).await
            }
            ArchiveOp::Undelete { undelete_id } => backend.undelete_file(undelete_id).await,
        };
        if let Err(e) = result {
            tracing::warn!(op = ?self, error = %e, "Archive update failed");
        }
    }
}

impl CaptureRouter {
    /// Apply a bookmark mutation. Returns a handle to the archive update it
    /// queued, if any.
    pub async fn handle_bookmark_event(&self, event: BookmarkEvent) -> Result<Option<FinishHandle>> {
        // Titles and paths as they were before the mutation
        let before = self.mirror();

        match event {
            BookmarkEvent::Created { node } => self.on_created(node).await,

            BookmarkEvent::Changed { id, title, .. } => {
                let old_title = before.title_of(&id).map(str::to_string);
                self.refresh_mirror().await?;

                let (Some(old_title), Some(title)) = (old_title, title) else {
                    return Ok(None);
                };
                if old_title == title {
                    return Ok(None);
                }

                let target = self.bookmark_path(&id).await;
                if !target.in_library {
                    return Ok(None);
                }
                let mut from = target.path.clone();
                if let Some(last) = from.last_mut() {
                    *last = old_title;
                }

                let op = ArchiveOp::Move {
                    from,
                    to: target.path,
                };
                Ok(Some(self.defer(&id, op).await))
            }

            BookmarkEvent::Moved {
                id,
                parent_id,
                old_parent_id,
            } => {
                let title = match before.title_of(&id) {
                    Some(title) => Some(title.to_string()),
                    None => self.bookmarks.get(&id).await?.map(|n| n.title),
                };
                let source = before.get_path(self.bookmarks.as_ref(), &old_parent_id).await;
                self.refresh_mirror().await?;
                let target = self.bookmark_path(&parent_id).await;

                let Some(title) = title else {
                    tracing::debug!(bookmark_id = %id, "Moved bookmark is gone");
                    return Ok(None);
                };

                let op = match (source.in_library, target.in_library) {
                    (true, true) => ArchiveOp::Move {
                        from: source.child(&title).path,
                        to: target.child(&title).path,
                    },
                    (true, false) => {
                        self.stop_bookmark(&id).await;
                        ArchiveOp::Delete {
                            path: source.child(&title).path,
                            undelete_id: id.clone(),
                        }
                    }
                    (false, true) => ArchiveOp::Undelete {
                        undelete_id: id.clone(),
                    },
                    (false, false) => return Ok(None),
                };
                Ok(Some(self.defer(&id, op).await))
            }

            BookmarkEvent::Removed {
                id,
                parent_id,
                node,
            } => {
                let title = before
                    .title_of(&id)
                    .map(str::to_string)
                    .unwrap_or(node.title);
                let source = before.get_path(self.bookmarks.as_ref(), &parent_id).await;
                self.refresh_mirror().await?;

                if !source.in_library {
                    return Ok(None);
                }

                self.stop_bookmark(&id).await;
                let op = ArchiveOp::Delete {
                    path: source.child(&title).path,
                    undelete_id: id.clone(),
                };
                Ok(Some(self.defer(&id, op).await))
            }
        }
    }

    async fn on_created(&self, node: BookmarkNode) -> Result<Option<FinishHandle>> {
        // Bookmarking a capture should archive the live site
        if let Some(url) = node.url.as_deref().filter(|u| self.translator.is_local(u)) {
            let original = self.history_url(url);
            if original != url {
                tracing::info!(bookmark_id = %node.id, url = %original, "Bookmark points at a capture, restoring");
                if let Err(e) = self.bookmarks.update_url(&node.id, &original).await {
                    tracing::warn!(bookmark_id = %node.id, error = %e, "Failed to restore bookmark");
                }
            }
        }

        self.refresh_mirror().await?;
        let path = self.bookmark_path(&node.id).await;
        if !path.in_library {
            return Ok(None);
        }

        let op = ArchiveOp::Undelete {
            undelete_id: node.id.clone(),
        };
        Ok(Some(self.defer(&node.id, op).await))
    }

    async fn defer(&self, bookmark_id: &str, op: ArchiveOp) -> FinishHandle {
        let backend = Arc::clone(&self.backend);
        self.enqueue_after_finish(
            bookmark_id,
            Box::new(move || Box::pin(async move { op.apply(backend.as_ref()).await })),
        )
        .await
    }
}
