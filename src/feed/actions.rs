//! User actions against the feed: likes, comments, edits, deletes.
//!
//! Every action is apply-after-confirm: nothing changes locally until the
//! server acknowledges the mutation, then the stored item and its rendered
//! nodes are patched together. A rejected action leaves the view exactly as
//! it was. The view may have moved on while the request was in flight, so a
//! confirmed patch landing on a detached entry is dropped silently.

use crate::dom::DomError;
use crate::feed::reconciler::FeedView;
use crate::feed::render::{self, LIKED_ATTR};
use crate::feed::thread::{ThreadError, ThreadManager};
use crate::feed::types::StickerRef;
use crate::net::{ApiClient, ApiError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error(transparent)]
    Thread(#[from] ThreadError),
    #[error("no rendered entry for target")]
    UnknownEntry,
}

/// Action dispatcher bound to one view, its threads and the API client.
pub struct Actions {
    client: Arc<ApiClient>,
    view: Arc<Mutex<FeedView>>,
    threads: Arc<Mutex<ThreadManager>>,
}

impl Actions {
    pub fn new(
        client: Arc<ApiClient>,
        view: Arc<Mutex<FeedView>>,
        threads: Arc<Mutex<ThreadManager>>,
    ) -> Self {
        Self {
            client,
            view,
            threads,
        }
    }

    /// Toggles the viewer's like on a post. Resolves to the new liked state.
    pub async fn toggle_post_like(&self, post_id: &str) -> Result<bool, ActionError> {
        let (was_liked, nodes) = {
            let view = self.view.lock().await;
            let item = view.item(post_id).ok_or(ActionError::UnknownEntry)?;
            let entry = view.entry(post_id).ok_or(ActionError::UnknownEntry)?;
            (item.is_liked_by_viewer, entry.nodes)
        };

        if was_liked {
            self.client.unlike(post_id).await?;
        } else {
            self.client.like(post_id, "discuss").await?;
        }

        let now_liked = !was_liked;
        let mut view = self.view.lock().await;
        let mut count = 0;
        view.update_item(post_id, |item| {
            item.is_liked_by_viewer = now_liked;
            item.like_count += if now_liked { 1 } else { -1 };
            count = item.like_count;
        });
        let label = render::like_label(count);
        let liked = now_liked.to_string();
        let like = nodes.like_button;
        let patch = view.queue().enqueue_on(nodes.root, move |t| {
            t.set_text(like, &label)?;
            t.set_attr(like, LIKED_ATTR, &liked)
        });
        drop(view);
        match patch.await {
            Ok(()) | Err(DomError::Detached) => {}
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(post_id, liked = now_liked, "post like toggled");
        Ok(now_liked)
    }

    /// Toggles the viewer's like on a comment in an open thread.
    pub async fn toggle_comment_like(
        &self,
        post_id: &str,
        comment_id: &str,
    ) -> Result<bool, ActionError> {
        let (was_liked, nodes) = {
            let threads = self.threads.lock().await;
            let comment = threads
                .comment(post_id, comment_id)
                .ok_or(ActionError::UnknownEntry)?;
            let nodes = threads
                .comment_entry(post_id, comment_id)
                .copied()
                .ok_or(ActionError::UnknownEntry)?;
            (comment.is_liked_by_viewer, nodes)
        };

        if was_liked {
            self.client.unlike(comment_id).await?;
        } else {
            self.client.like(comment_id, "comment").await?;
        }

        let now_liked = !was_liked;
        let mut threads = self.threads.lock().await;
        let mut count = 0;
        threads.update_comment(post_id, comment_id, |comment| {
            comment.is_liked_by_viewer = now_liked;
            comment.like_count += if now_liked { 1 } else { -1 };
            count = comment.like_count;
        });
        let view = self.view.lock().await;
        let label = render::like_label(count);
        let liked = now_liked.to_string();
        let like = nodes.like_button;
        let patch = view.queue().enqueue_on(nodes.root, move |t| {
            t.set_text(like, &label)?;
            t.set_attr(like, LIKED_ATTR, &liked)
        });
        drop(view);
        drop(threads);
        match patch.await {
            Ok(()) | Err(DomError::Detached) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(now_liked)
    }

    /// Posts a comment. On confirmation the post's comment counter is bumped
    /// and the open thread is refreshed so the new comment appears with its
    /// server-assigned id.
    pub async fn submit_comment(
        &self,
        post_id: &str,
        content: &str,
        sticker: Option<&StickerRef>,
    ) -> Result<(), ActionError> {
        self.client
            .create_comment(post_id, content, sticker.map(|s| s.id.as_str()))
            .await?;

        let mut view = self.view.lock().await;
        let mut count = 0;
        view.update_item(post_id, |item| {
            item.comment_count += 1;
            count = item.comment_count;
        });
        let patch = view.entry(post_id).and_then(|entry| {
            entry.nodes.comment_toggle.map(|toggle| {
                let label = render::comment_label(count);
                view.queue()
                    .enqueue_on(entry.nodes.root, move |t| t.set_text(toggle, &label))
            })
        });
        drop(view);
        if let Some(patch) = patch {
            match patch.await {
                Ok(()) | Err(DomError::Detached) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut threads = self.threads.lock().await;
        threads.refresh(&self.client, post_id).await?;
        tracing::debug!(post_id, "comment submitted");
        Ok(())
    }

    /// Marks a post as being edited. While set, refreshes leave its body
    /// alone.
    pub async fn begin_edit_post(&self, post_id: &str) -> Result<(), ActionError> {
        let mut view = self.view.lock().await;
        let ui = view.ui_mut(post_id).ok_or(ActionError::UnknownEntry)?;
        ui.editing = true;
        Ok(())
    }

    /// Abandons an edit, re-rendering the body from the last known item.
    pub async fn cancel_edit_post(&self, post_id: &str) -> Result<(), ActionError> {
        let mut view = self.view.lock().await;
        if let Some(ui) = view.ui_mut(post_id) {
            ui.editing = false;
        }
        let patch = self.post_body_patch(&view, post_id);
        drop(view);
        if let Some(patch) = patch {
            match patch.await {
                Ok(()) | Err(DomError::Detached) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Commits an edit. On confirmation the stored item and the rendered
    /// body are replaced; on rejection the original body is restored and the
    /// error surfaces.
    pub async fn commit_edit_post(
        &self,
        post_id: &str,
        content: &str,
        sticker: Option<StickerRef>,
    ) -> Result<(), ActionError> {
        let result = self
            .client
            .edit_post(post_id, content, sticker.as_ref().map(|s| s.id.as_str()))
            .await;
        if let Err(e) = result {
            self.cancel_edit_post(post_id).await?;
            return Err(e.into());
        }

        let mut view = self.view.lock().await;
        let content = content.to_string();
        view.update_item(post_id, |item| {
            item.body_text = content;
            item.sticker = sticker;
        });
        if let Some(ui) = view.ui_mut(post_id) {
            ui.editing = false;
        }
        let body_patch = self.post_body_patch(&view, post_id);
        let sticker_patch = view.entry(post_id).map(|entry| {
            let item = view.item(post_id);
            let specs = render::sticker_content(item.and_then(|i| i.sticker.as_ref()));
            let slot = entry.nodes.sticker_slot;
            view.queue()
                .enqueue_on(entry.nodes.root, move |t| t.set_content(slot, specs))
        });
        drop(view);
        if let Some(patch) = body_patch {
            match patch.await {
                Ok(()) | Err(DomError::Detached) => {}
                Err(e) => return Err(e.into()),
            }
        }
        if let Some(patch) = sticker_patch {
            match patch.await {
                Ok(()) | Err(DomError::Detached) => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::debug!(post_id, "post edited");
        Ok(())
    }

    pub async fn begin_edit_comment(&self, post_id: &str, comment_id: &str) {
        self.threads.lock().await.begin_edit(post_id, comment_id);
    }

    pub async fn cancel_edit_comment(
        &self,
        post_id: &str,
        comment_id: &str,
    ) -> Result<(), ActionError> {
        let mut threads = self.threads.lock().await;
        threads.end_edit(post_id, comment_id);
        let patch = self.comment_body_patch(&threads, post_id, comment_id).await;
        drop(threads);
        if let Some(patch) = patch {
            match patch.await {
                Ok(()) | Err(DomError::Detached) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub async fn commit_edit_comment(
        &self,
        post_id: &str,
        comment_id: &str,
        content: &str,
        sticker: Option<StickerRef>,
    ) -> Result<(), ActionError> {
        let result = self
            .client
            .edit_comment(comment_id, content, sticker.as_ref().map(|s| s.id.as_str()))
            .await;
        if let Err(e) = result {
            self.cancel_edit_comment(post_id, comment_id).await?;
            return Err(e.into());
        }

        let mut threads = self.threads.lock().await;
        let content = content.to_string();
        threads.update_comment(post_id, comment_id, |comment| {
            comment.body_text = content;
            comment.sticker = sticker;
        });
        threads.end_edit(post_id, comment_id);
        let patch = self.comment_body_patch(&threads, post_id, comment_id).await;
        drop(threads);
        if let Some(patch) = patch {
            match patch.await {
                Ok(()) | Err(DomError::Detached) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Deletes a post. On confirmation its subtree (open thread included)
    /// is detached and all local state dropped.
    pub async fn delete_post(&self, post_id: &str) -> Result<(), ActionError> {
        self.client.delete_post(post_id).await?;

        self.threads.lock().await.forget(post_id);
        let mut view = self.view.lock().await;
        let Some(entry) = view.forget(post_id) else {
            return Ok(());
        };
        let root = entry.nodes.root;
        let removal = view.queue().enqueue_on(root, move |t| t.remove(root));
        drop(view);
        match removal.await {
            Ok(()) | Err(DomError::Detached) => {}
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(post_id, "post deleted");
        Ok(())
    }

    /// Deletes a comment from an open thread and decrements the owning
    /// post's counter.
    pub async fn delete_comment(
        &self,
        post_id: &str,
        comment_id: &str,
    ) -> Result<(), ActionError> {
        self.client.delete_comment(comment_id).await?;

        let mut threads = self.threads.lock().await;
        let nodes = threads.remove_comment_state(post_id, comment_id);
        drop(threads);
        if let Some(nodes) = nodes {
            let view = self.view.lock().await;
            let root = nodes.root;
            let removal = view.queue().enqueue_on(root, move |t| t.remove(root));
            drop(view);
            match removal.await {
                Ok(()) | Err(DomError::Detached) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut view = self.view.lock().await;
        let mut count = 0;
        view.update_item(post_id, |item| {
            item.comment_count = (item.comment_count - 1).max(0);
            count = item.comment_count;
        });
        let patch = view.entry(post_id).and_then(|entry| {
            entry.nodes.comment_toggle.map(|toggle| {
                let label = render::comment_label(count);
                view.queue()
                    .enqueue_on(entry.nodes.root, move |t| t.set_text(toggle, &label))
            })
        });
        drop(view);
        if let Some(patch) = patch {
            match patch.await {
                Ok(()) | Err(DomError::Detached) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn post_body_patch(
        &self,
        view: &FeedView,
        post_id: &str,
    ) -> Option<impl std::future::Future<Output = Result<(), DomError>>> {
        let entry = view.entry(post_id)?;
        let item = view.item(post_id)?;
        let specs = render::body_content(&item.body_text, view.tlds());
        let body = entry.nodes.body;
        Some(
            view.queue()
                .enqueue_on(entry.nodes.root, move |t| t.set_content(body, specs)),
        )
    }

    async fn comment_body_patch(
        &self,
        threads: &ThreadManager,
        post_id: &str,
        comment_id: &str,
    ) -> Option<impl std::future::Future<Output = Result<(), DomError>>> {
        let nodes = threads.comment_entry(post_id, comment_id).copied()?;
        let comment = threads.comment(post_id, comment_id)?;
        let view = self.view.lock().await;
        let specs = render::body_content(&comment.body_text, view.tlds());
        let body = nodes.body;
        Some(
            view.queue()
                .enqueue_on(nodes.root, move |t| t.set_content(body, specs)),
        )
    }
}
