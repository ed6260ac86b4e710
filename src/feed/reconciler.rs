//! Authoritative feed reconciliation.
//!
//! Each refresh brings a fresh server snapshot of the recent window. Instead
//! of rebuilding the list, the pass diffs the snapshot against what is
//! already rendered: vanished entries are detached, surviving entries are
//! patched field by field, and only genuinely new entries are materialized.
//! Entries loaded through manual pagination sit in an "older" tail below the
//! recent window and are never removed by a refresh. A snapshot identical to
//! the previously applied one queues zero operations.

use crate::dom::{
    DomError, EntryNodes, MutationQueue, NodeId, RenderedEntry, RenderedIndex, UiState,
};
use crate::feed::render::{self, LIKED_ATTR, SECTION_ATTR};
use crate::feed::types::FeedItem;
use crate::util::TldList;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// What a reconciliation pass changed, in entry ids.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub created: Vec<String>,
    pub removed: Vec<String>,
}

/// Position of an entry in the rebuilt child order: an already-rendered root,
/// or the n-th entry materialized by this pass.
enum Slot {
    Existing(NodeId),
    Fresh(usize),
}

type Captured = Arc<Mutex<Vec<(String, EntryNodes)>>>;

/// The rendered feed and the state needed to patch it in place.
pub struct FeedView {
    queue: Arc<MutationQueue>,
    container: NodeId,
    tlds: TldList,
    index: RenderedIndex,
    /// Last applied recent-window snapshot, in display order.
    recent: Vec<FeedItem>,
    /// Manually paginated entries, in display order below the recent window.
    older: Vec<FeedItem>,
    cursor: Option<Value>,
    loading_more: bool,
    max_posts: usize,
}

impl FeedView {
    /// `container` must be an overlay-owned element already attached to the
    /// tree; all entries are rendered as its children.
    pub fn new(
        queue: Arc<MutationQueue>,
        container: NodeId,
        tlds: TldList,
        max_posts: usize,
    ) -> Self {
        Self {
            queue,
            container,
            tlds,
            index: RenderedIndex::new(),
            recent: Vec::new(),
            older: Vec::new(),
            cursor: None,
            loading_more: false,
            max_posts,
        }
    }

    pub fn container(&self) -> NodeId {
        self.container
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn tlds(&self) -> &TldList {
        &self.tlds
    }

    /// Swaps in a refreshed TLD list; affects entries rendered from now on.
    pub fn set_tlds(&mut self, tlds: TldList) {
        self.tlds = tlds;
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn entry(&self, id: &str) -> Option<&RenderedEntry> {
        self.index.get(id)
    }

    pub fn ui_mut(&mut self, id: &str) -> Option<&mut UiState> {
        self.index.get_mut(id).map(|e| &mut e.ui)
    }

    /// Last known item for `id`, recent window or older tail.
    pub fn item(&self, id: &str) -> Option<&FeedItem> {
        self.recent
            .iter()
            .find(|i| i.id == id)
            .or_else(|| self.older.iter().find(|i| i.id == id))
    }

    /// Applies `patch` to the stored item, keeping the local model in step
    /// with a confirmed action. Returns false when the id is unknown.
    pub fn update_item<F: FnOnce(&mut FeedItem)>(&mut self, id: &str, patch: F) -> bool {
        if let Some(item) = self
            .recent
            .iter_mut()
            .chain(self.older.iter_mut())
            .find(|i| i.id == id)
        {
            patch(item);
            true
        } else {
            false
        }
    }

    /// Drops an entry from all local collections. The caller is responsible
    /// for detaching its subtree.
    pub fn forget(&mut self, id: &str) -> Option<RenderedEntry> {
        self.recent.retain(|i| i.id != id);
        self.older.retain(|i| i.id != id);
        self.index.remove(id)
    }

    /// Drops all local state. Node teardown happens separately by removing
    /// the container subtree.
    pub fn clear(&mut self) {
        self.index.clear();
        self.recent.clear();
        self.older.clear();
        self.cursor = None;
        self.loading_more = false;
    }

    pub fn cursor(&self) -> Option<&Value> {
        self.cursor.as_ref()
    }

    pub fn set_cursor(&mut self, cursor: Option<Value>) {
        self.cursor = cursor;
    }

    /// Claims the load-more in-flight slot. A `false` return means another
    /// load is already running and this request should be dropped.
    pub fn begin_load_more(&mut self) -> bool {
        if self.loading_more {
            return false;
        }
        self.loading_more = true;
        true
    }

    pub fn end_load_more(&mut self) {
        self.loading_more = false;
    }

    /// Applies a fresh recent-window snapshot.
    pub async fn reconcile(&mut self, snapshot: &[FeedItem]) -> Result<ReconcileOutcome, DomError> {
        let mut seen = HashSet::new();
        let server: Vec<&FeedItem> = snapshot
            .iter()
            .take(self.max_posts)
            .filter(|i| seen.insert(i.id.as_str()))
            .collect();

        if self.recent.iter().eq(server.iter().copied()) {
            return Ok(ReconcileOutcome::default());
        }

        let server_ids: HashSet<&str> = server.iter().map(|i| i.id.as_str()).collect();
        let mut ops: Vec<BoxFuture<'static, Result<(), DomError>>> = Vec::new();
        let mut removed = Vec::new();

        // Entries gone from the recent window; the older tail is exempt.
        for (id, entry) in self.index.iter() {
            if entry.in_more_section || server_ids.contains(id) {
                continue;
            }
            let root = entry.nodes.root;
            ops.push(self.queue.enqueue_on(root, move |t| t.remove(root)).boxed());
            removed.push(id.to_string());
        }

        // Patch surviving entries in place.
        for item in &server {
            let Some(entry) = self.index.get(&item.id) else {
                continue;
            };
            let nodes = entry.nodes;
            let editing = entry.ui.editing;
            let promoted = entry.in_more_section;
            let old = self.item(&item.id);

            let body_changed = old.map(|o| o.body_text != item.body_text).unwrap_or(true);
            if body_changed && !editing {
                let specs = render::body_content(&item.body_text, &self.tlds);
                let body = nodes.body;
                ops.push(
                    self.queue
                        .enqueue_on(nodes.root, move |t| t.set_content(body, specs))
                        .boxed(),
                );
            }

            if old.map(|o| o.sticker != item.sticker).unwrap_or(true) {
                let specs = render::sticker_content(item.sticker.as_ref());
                let slot = nodes.sticker_slot;
                ops.push(
                    self.queue
                        .enqueue_on(nodes.root, move |t| t.set_content(slot, specs))
                        .boxed(),
                );
            }

            let like_changed = old
                .map(|o| {
                    o.like_count != item.like_count
                        || o.is_liked_by_viewer != item.is_liked_by_viewer
                })
                .unwrap_or(true);
            if like_changed {
                let label = render::like_label(item.like_count);
                let flag_changed = old
                    .map(|o| o.is_liked_by_viewer != item.is_liked_by_viewer)
                    .unwrap_or(true);
                let liked = item.is_liked_by_viewer.to_string();
                let like = nodes.like_button;
                ops.push(
                    self.queue
                        .enqueue_on(nodes.root, move |t| {
                            t.set_text(like, &label)?;
                            if flag_changed {
                                t.set_attr(like, LIKED_ATTR, &liked)?;
                            }
                            Ok(())
                        })
                        .boxed(),
                );
            }

            if let Some(toggle) = nodes.comment_toggle {
                if old
                    .map(|o| o.comment_count != item.comment_count)
                    .unwrap_or(true)
                {
                    let label = render::comment_label(item.comment_count);
                    ops.push(
                        self.queue
                            .enqueue_on(nodes.root, move |t| t.set_text(toggle, &label))
                            .boxed(),
                    );
                }
            }

            // An older-tail entry re-entering the recent window rejoins the
            // removable set and loses its section tag.
            if promoted {
                let root = nodes.root;
                ops.push(
                    self.queue
                        .enqueue_on(root, move |t| t.remove_attr(root, SECTION_ATTR))
                        .boxed(),
                );
            }
        }

        // New entries plus the child-order rebuild go through one operation
        // so no intermediate order is ever observable.
        let mut new_specs = Vec::new();
        let mut slots = Vec::with_capacity(server.len());
        for item in &server {
            match self.index.get(&item.id) {
                Some(entry) => slots.push(Slot::Existing(entry.nodes.root)),
                None => {
                    slots.push(Slot::Fresh(new_specs.len()));
                    new_specs.push((item.id.clone(), render::post_spec(item, &self.tlds, false)));
                }
            }
        }
        let surviving: Vec<&str> = self
            .recent
            .iter()
            .map(|i| i.id.as_str())
            .filter(|id| server_ids.contains(id))
            .collect();
        let promoted_any = server
            .iter()
            .any(|i| self.index.get(&i.id).map(|e| e.in_more_section) == Some(true));
        let order_unchanged = !promoted_any
            && surviving == server.iter().map(|i| i.id.as_str()).collect::<Vec<_>>();

        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        if !new_specs.is_empty() || !order_unchanged {
            let older_tail: Vec<NodeId> = self
                .older
                .iter()
                .filter(|i| !server_ids.contains(i.id.as_str()))
                .filter_map(|i| self.index.get(&i.id).map(|e| e.nodes.root))
                .collect();
            let container = self.container;
            let sink = Arc::clone(&captured);
            ops.push(
                self.queue
                    .enqueue_op(move |tree| async move {
                        let mut guard = tree.write();
                        if !guard.is_attached(container) {
                            return Err(DomError::Detached);
                        }
                        let scroll = guard.scroll_top();
                        let mut fresh_roots = Vec::with_capacity(new_specs.len());
                        let mut fresh_nodes = Vec::with_capacity(new_specs.len());
                        for (id, spec) in new_specs {
                            let li = guard.append(container, spec)?;
                            fresh_nodes.push((id, render::capture_entry(&guard, li, true)?));
                            fresh_roots.push(li);
                        }
                        let mut order = Vec::with_capacity(slots.len() + older_tail.len());
                        for slot in slots {
                            order.push(match slot {
                                Slot::Existing(root) => root,
                                Slot::Fresh(i) => fresh_roots[i],
                            });
                        }
                        order.extend(older_tail);
                        guard.set_children(container, &order)?;
                        guard.set_scroll_top(scroll);
                        *sink.lock() = fresh_nodes;
                        Ok(())
                    })
                    .boxed(),
            );
        }

        for op in ops {
            match op.await {
                Ok(()) => {}
                // Already gone when the operation ran; nothing to roll back.
                Err(DomError::Detached) => {}
                Err(e) => return Err(e),
            }
        }

        // Commit local state only after the queue has applied everything.
        for id in &removed {
            self.index.remove(id);
        }
        for item in &server {
            if let Some(entry) = self.index.get_mut(&item.id) {
                entry.in_more_section = false;
            }
        }
        let mut created = Vec::new();
        for (id, nodes) in captured.lock().drain(..) {
            let replaced = self.index.insert(
                id.clone(),
                RenderedEntry {
                    nodes,
                    ui: UiState::default(),
                    in_more_section: false,
                },
            );
            if replaced.is_some() {
                tracing::warn!(post_id = %id, "entry rendered twice in one pass");
            }
            created.push(id);
        }
        self.older.retain(|i| !server_ids.contains(i.id.as_str()));
        self.recent = server.into_iter().cloned().collect();

        tracing::debug!(
            created = created.len(),
            removed = removed.len(),
            total = self.index.len(),
            "feed view reconciled"
        );
        Ok(ReconcileOutcome { created, removed })
    }

    /// Appends a page of manually loaded entries below the recent window.
    /// Already-rendered ids are skipped.
    pub async fn append_older(&mut self, page: &[FeedItem]) -> Result<Vec<String>, DomError> {
        let mut seen = HashSet::new();
        let fresh: Vec<FeedItem> = page
            .iter()
            .filter(|i| !self.index.contains(&i.id) && seen.insert(i.id.clone()))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(Vec::new());
        }

        let specs: Vec<(String, _)> = fresh
            .iter()
            .map(|i| (i.id.clone(), render::post_spec(i, &self.tlds, true)))
            .collect();
        let container = self.container;
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        self.queue
            .enqueue_op(move |tree| async move {
                let mut guard = tree.write();
                if !guard.is_attached(container) {
                    return Err(DomError::Detached);
                }
                let mut fresh_nodes = Vec::with_capacity(specs.len());
                for (id, spec) in specs {
                    let li = guard.append(container, spec)?;
                    fresh_nodes.push((id, render::capture_entry(&guard, li, true)?));
                }
                *sink.lock() = fresh_nodes;
                Ok(())
            })
            .await?;

        let mut ids = Vec::with_capacity(fresh.len());
        for (id, nodes) in captured.lock().drain(..) {
            self.index.insert(
                id.clone(),
                RenderedEntry {
                    nodes,
                    ui: UiState::default(),
                    in_more_section: true,
                },
            );
            ids.push(id);
        }
        self.older.extend(fresh);
        tracing::debug!(appended = ids.len(), "older entries appended");
        Ok(ids)
    }
}
