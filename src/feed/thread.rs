//! Comment threads under feed entries.
//!
//! A thread mounts lazily when its entry is expanded: a container goes in
//! under the entry's root, the first page is fetched, and further pages are
//! pulled through an explicit load-more call. Pagination keeps a server
//! cursor per thread and an in-flight flag; a load-more issued while one is
//! already running is dropped, not queued. Background refreshes re-fetch the
//! loaded window and merge it into place the same way the feed reconciler
//! does for posts.

use crate::dom::{DomError, EntryNodes, MutationQueue, NodeId, NodeSpec};
use crate::feed::render::{self, LIKED_ATTR, ROLE_ATTR};
use crate::feed::types::{CommentItem, FeedItem};
use crate::net::{ApiClient, ApiError, PagedList};
use crate::util::TldList;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum ThreadError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Dom(#[from] DomError),
}

/// One open comment thread.
pub struct ThreadState {
    container: NodeId,
    comments: Vec<CommentItem>,
    nodes: HashMap<String, EntryNodes>,
    cursor: Option<Value>,
    total: Option<i64>,
    loading: bool,
    editing: HashSet<String>,
}

impl ThreadState {
    pub fn container(&self) -> NodeId {
        self.container
    }

    pub fn comment_count(&self) -> usize {
        self.comments.len()
    }

    pub fn total(&self) -> Option<i64> {
        self.total
    }

    pub fn has_more(&self) -> bool {
        self.cursor.is_some()
    }
}

/// All open threads for one feed view.
pub struct ThreadManager {
    queue: Arc<MutationQueue>,
    tlds: TldList,
    threads: HashMap<String, ThreadState>,
    page_size: u32,
}

impl ThreadManager {
    pub fn new(queue: Arc<MutationQueue>, tlds: TldList, page_size: u32) -> Self {
        Self {
            queue,
            tlds,
            threads: HashMap::new(),
            page_size,
        }
    }

    pub fn set_tlds(&mut self, tlds: TldList) {
        self.tlds = tlds;
    }

    pub fn is_open(&self, post_id: &str) -> bool {
        self.threads.contains_key(post_id)
    }

    pub fn open_ids(&self) -> Vec<String> {
        self.threads.keys().cloned().collect()
    }

    pub fn thread(&self, post_id: &str) -> Option<&ThreadState> {
        self.threads.get(post_id)
    }

    pub fn comment(&self, post_id: &str, comment_id: &str) -> Option<&CommentItem> {
        self.threads
            .get(post_id)?
            .comments
            .iter()
            .find(|c| c.id == comment_id)
    }

    pub fn comment_entry(&self, post_id: &str, comment_id: &str) -> Option<&EntryNodes> {
        self.threads.get(post_id)?.nodes.get(comment_id)
    }

    /// Applies `patch` to the stored comment, keeping the local model in step
    /// with a confirmed action.
    pub fn update_comment<F: FnOnce(&mut CommentItem)>(
        &mut self,
        post_id: &str,
        comment_id: &str,
        patch: F,
    ) -> bool {
        if let Some(comment) = self
            .threads
            .get_mut(post_id)
            .and_then(|s| s.comments.iter_mut().find(|c| c.id == comment_id))
        {
            patch(comment);
            true
        } else {
            false
        }
    }

    /// Drops a comment from the thread's collections, returning its node
    /// handles so the caller can detach the subtree.
    pub fn remove_comment_state(
        &mut self,
        post_id: &str,
        comment_id: &str,
    ) -> Option<EntryNodes> {
        let state = self.threads.get_mut(post_id)?;
        state.comments.retain(|c| c.id != comment_id);
        state.editing.remove(comment_id);
        state.nodes.remove(comment_id)
    }

    /// Marks a comment as being edited; its body is exempt from refresh
    /// patches until [`end_edit`](Self::end_edit).
    pub fn begin_edit(&mut self, post_id: &str, comment_id: &str) {
        if let Some(state) = self.threads.get_mut(post_id) {
            state.editing.insert(comment_id.to_string());
        }
    }

    pub fn end_edit(&mut self, post_id: &str, comment_id: &str) {
        if let Some(state) = self.threads.get_mut(post_id) {
            state.editing.remove(comment_id);
        }
    }

    /// Drops thread state without touching the tree. Used when the owning
    /// entry's subtree is already gone.
    pub fn forget(&mut self, post_id: &str) {
        self.threads.remove(post_id);
    }

    /// Opens the thread under `entry_root` and loads its first page.
    /// Returns the number of comments rendered; an already-open thread is
    /// left alone.
    pub async fn expand(
        &mut self,
        client: &ApiClient,
        post_id: &str,
        entry_root: NodeId,
    ) -> Result<usize, ThreadError> {
        if self.threads.contains_key(post_id) {
            tracing::debug!(post_id, "thread already open");
            return Ok(0);
        }

        let slot: Arc<SyncMutex<Option<NodeId>>> = Arc::new(SyncMutex::new(None));
        let sink = Arc::clone(&slot);
        self.queue
            .enqueue_op(move |tree| async move {
                let mut guard = tree.write();
                let ul = guard.append(
                    entry_root,
                    NodeSpec::element("ul").attr(ROLE_ATTR, "thread"),
                )?;
                *sink.lock() = Some(ul);
                Ok(())
            })
            .await?;
        let container = slot.lock().take().ok_or(DomError::Detached)?;

        self.threads.insert(
            post_id.to_string(),
            ThreadState {
                container,
                comments: Vec::new(),
                nodes: HashMap::new(),
                cursor: None,
                total: None,
                loading: true,
                editing: HashSet::new(),
            },
        );

        let page = match client.list_comments(post_id, self.page_size, None).await {
            Ok(page) => page,
            Err(e) => {
                // Unmount the empty container; the thread never opened.
                self.threads.remove(post_id);
                let _ = self
                    .queue
                    .enqueue_on(container, move |t| t.remove(container))
                    .await;
                return Err(e.into());
            }
        };

        let appended = self.apply_page(post_id, &page).await?;
        if let Some(state) = self.threads.get_mut(post_id) {
            state.loading = false;
        }
        tracing::debug!(post_id, comments = appended, "thread opened");
        Ok(appended)
    }

    /// Closes the thread and detaches its subtree. Returns whether a thread
    /// was open.
    pub async fn collapse(&mut self, post_id: &str) -> Result<bool, DomError> {
        let Some(state) = self.threads.remove(post_id) else {
            return Ok(false);
        };
        let container = state.container;
        match self
            .queue
            .enqueue_on(container, move |t| t.remove(container))
            .await
        {
            Ok(()) | Err(DomError::Detached) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Fetches the next page for an open thread. Returns the number of
    /// comments appended; a call while another load is in flight, or with no
    /// further pages, is dropped with `Ok(0)`.
    pub async fn load_more(
        manager: &Mutex<ThreadManager>,
        client: &ApiClient,
        post_id: &str,
    ) -> Result<usize, ThreadError> {
        let (cursor, display) = {
            let mut mgr = manager.lock().await;
            let Some(state) = mgr.threads.get_mut(post_id) else {
                return Ok(0);
            };
            if state.loading {
                tracing::debug!(post_id, "load-more already in flight, dropping");
                return Ok(0);
            }
            let Some(cursor) = state.cursor.clone() else {
                return Ok(0);
            };
            state.loading = true;
            (cursor, mgr.page_size)
        };

        let result = client.list_comments(post_id, display, Some(&cursor)).await;
        let mut mgr = manager.lock().await;
        let page = match result {
            Ok(page) => page,
            Err(e) => {
                if let Some(state) = mgr.threads.get_mut(post_id) {
                    state.loading = false;
                }
                return Err(e.into());
            }
        };
        let appended = mgr.apply_page(post_id, &page).await?;
        if let Some(state) = mgr.threads.get_mut(post_id) {
            state.loading = false;
        }
        tracing::debug!(post_id, appended, "thread page loaded");
        Ok(appended)
    }

    /// Re-fetches the loaded window of an open thread and merges it in
    /// place: counts patched, new comments appended, vanished ones removed
    /// when the fetch covered the whole thread.
    pub async fn refresh(
        &mut self,
        client: &ApiClient,
        post_id: &str,
    ) -> Result<usize, ThreadError> {
        let display = {
            let Some(state) = self.threads.get(post_id) else {
                return Ok(0);
            };
            if state.loading {
                return Ok(0);
            }
            (state.comments.len() as u32).max(self.page_size)
        };

        let page = client.list_comments(post_id, display, None).await?;
        let fetched: Vec<CommentItem> = page.list.iter().cloned().map(FeedItem::from).collect();
        // A short page means the window covered the whole thread, so local
        // comments missing from it were deleted server-side.
        let complete = (fetched.len() as u32) < display;
        let fetched_ids: HashSet<&str> = fetched.iter().map(|c| c.id.as_str()).collect();

        let Some(state) = self.threads.get(post_id) else {
            return Ok(0);
        };
        let mut ops: Vec<BoxFuture<'static, Result<(), DomError>>> = Vec::new();
        let mut fresh = Vec::new();
        for item in &fetched {
            match state.nodes.get(&item.id) {
                Some(&nodes) => {
                    let old = state.comments.iter().find(|c| c.id == item.id);
                    let suppress_body = state.editing.contains(&item.id);
                    ops.extend(self.patch_ops(nodes, old, item, suppress_body));
                }
                None => fresh.push(item.clone()),
            }
        }
        let mut removed = Vec::new();
        if complete {
            for (id, nodes) in &state.nodes {
                if !fetched_ids.contains(id.as_str()) {
                    let root = nodes.root;
                    ops.push(self.queue.enqueue_on(root, move |t| t.remove(root)).boxed());
                    removed.push(id.clone());
                }
            }
        }

        for op in ops {
            match op.await {
                Ok(()) | Err(DomError::Detached) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(state) = self.threads.get_mut(post_id) {
            for item in &fetched {
                if let Some(existing) = state.comments.iter_mut().find(|c| c.id == item.id) {
                    *existing = item.clone();
                }
            }
            for id in &removed {
                state.comments.retain(|c| c.id != *id);
                state.nodes.remove(id);
            }
            state.cursor = page.search_after.clone();
            state.total = page.total.or(state.total);
        }

        let appended = self.append_items(post_id, fresh).await?;
        Ok(appended)
    }

    /// Renders a page into the thread and records its cursor.
    async fn apply_page(&mut self, post_id: &str, page: &PagedList) -> Result<usize, ThreadError> {
        let items: Vec<CommentItem> = page.list.iter().cloned().map(FeedItem::from).collect();
        let appended = self.append_items(post_id, items).await?;
        if let Some(state) = self.threads.get_mut(post_id) {
            state.cursor = page.search_after.clone();
            state.total = page.total.or(state.total);
        }
        Ok(appended)
    }

    /// Appends comments not yet rendered, in order, through one queued
    /// operation.
    async fn append_items(
        &mut self,
        post_id: &str,
        items: Vec<CommentItem>,
    ) -> Result<usize, ThreadError> {
        let Some(state) = self.threads.get(post_id) else {
            return Ok(0);
        };
        let mut seen = HashSet::new();
        let fresh: Vec<CommentItem> = items
            .into_iter()
            .filter(|c| !state.nodes.contains_key(&c.id) && seen.insert(c.id.clone()))
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        let specs: Vec<(String, NodeSpec)> = fresh
            .iter()
            .map(|c| (c.id.clone(), render::comment_spec(c, &self.tlds)))
            .collect();
        let container = state.container;
        let captured: Arc<SyncMutex<Vec<(String, EntryNodes)>>> =
            Arc::new(SyncMutex::new(Vec::new()));
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
                    fresh_nodes.push((id, render::capture_entry(&guard, li, false)?));
                }
                *sink.lock() = fresh_nodes;
                Ok(())
            })
            .await?;

        let appended = {
            let Some(state) = self.threads.get_mut(post_id) else {
                return Ok(0);
            };
            let mut count = 0;
            for (id, nodes) in captured.lock().drain(..) {
                state.nodes.insert(id, nodes);
                count += 1;
            }
            state.comments.extend(fresh);
            count
        };
        Ok(appended)
    }

    fn patch_ops(
        &self,
        nodes: EntryNodes,
        old: Option<&CommentItem>,
        new: &CommentItem,
        suppress_body: bool,
    ) -> Vec<BoxFuture<'static, Result<(), DomError>>> {
        let mut ops: Vec<BoxFuture<'static, Result<(), DomError>>> = Vec::new();

        let body_changed = old.map(|o| o.body_text != new.body_text).unwrap_or(true);
        if body_changed && !suppress_body {
            let specs = render::body_content(&new.body_text, &self.tlds);
            let body = nodes.body;
            ops.push(
                self.queue
                    .enqueue_on(nodes.root, move |t| t.set_content(body, specs))
                    .boxed(),
            );
        }

        if old.map(|o| o.sticker != new.sticker).unwrap_or(true) {
            let specs = render::sticker_content(new.sticker.as_ref());
            let slot = nodes.sticker_slot;
            ops.push(
                self.queue
                    .enqueue_on(nodes.root, move |t| t.set_content(slot, specs))
                    .boxed(),
            );
        }

        let like_changed = old
            .map(|o| {
                o.like_count != new.like_count || o.is_liked_by_viewer != new.is_liked_by_viewer
            })
            .unwrap_or(true);
        if like_changed {
            let label = render::like_label(new.like_count);
            let flag_changed = old
                .map(|o| o.is_liked_by_viewer != new.is_liked_by_viewer)
                .unwrap_or(true);
            let liked = new.is_liked_by_viewer.to_string();
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

        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::FakePage;
    use crate::auth::TokenStore;
    use crate::dom::{DomTree, SharedTree};
    use crate::feed::render::COMMENT_ID_ATTR;
    use parking_lot::RwLock;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ready_store() -> Arc<TokenStore> {
        let state = json!({
            "props": { "initialState": { "common": { "user": { "xToken": "tok" } } } }
        });
        let store = TokenStore::new(Arc::new(FakePage::new(Some("csrf"), Some(state))));
        assert!(store.extract());
        Arc::new(store)
    }

    fn client_for(server_uri: &str) -> ApiClient {
        ApiClient::new(
            reqwest::Client::new(),
            server_uri,
            ready_store(),
            0,
            Duration::from_millis(1),
            1.5,
        )
    }

    struct Fixture {
        tree: SharedTree,
        manager: ThreadManager,
        entry_root: NodeId,
    }

    fn fixture() -> Fixture {
        let tree: SharedTree = Arc::new(RwLock::new(DomTree::new()));
        let queue = Arc::new(MutationQueue::new(Arc::clone(&tree)));
        let entry_root = {
            let mut guard = tree.write();
            let root = guard.root();
            guard
                .append(root, NodeSpec::element("li").attr("data-post-id", "p1"))
                .unwrap()
        };
        let manager = ThreadManager::new(queue, TldList::baseline(), 3);
        Fixture {
            tree,
            manager,
            entry_root,
        }
    }

    fn comment_row(id: &str, content: &str, likes: i64) -> serde_json::Value {
        json!({
            "id": id,
            "content": content,
            "likesLength": likes,
            "isLike": false,
            "user": { "id": "u1", "nickname": "someone" }
        })
    }

    fn page_body(rows: Vec<serde_json::Value>, cursor: Option<serde_json::Value>) -> serde_json::Value {
        json!({ "data": { "commentList": {
            "list": rows,
            "searchAfter": cursor,
            "total": 10
        } } })
    }

    fn rendered_comment_ids(tree: &SharedTree, container: NodeId) -> Vec<String> {
        let guard = tree.read();
        guard
            .children(container)
            .into_iter()
            .filter_map(|c| guard.attr(c, COMMENT_ID_ATTR).map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn expand_mounts_thread_and_loads_first_page() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql/SELECT_COMMENTS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(
                vec![comment_row("c1", "first", 0), comment_row("c2", "second", 1)],
                None,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let mut fx = fixture();
        let client = client_for(&server.uri());
        let count = fx
            .manager
            .expand(&client, "p1", fx.entry_root)
            .await
            .unwrap();

        assert_eq!(count, 2);
        let container = fx.manager.thread("p1").unwrap().container();
        assert!(fx.tree.read().is_attached(container));
        assert_eq!(rendered_comment_ids(&fx.tree, container), vec!["c1", "c2"]);

        // Second expand is a no-op; the mock's expectation holds.
        let again = fx
            .manager
            .expand(&client, "p1", fx.entry_root)
            .await
            .unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn collapse_detaches_subtree_and_drops_state() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql/SELECT_COMMENTS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(
                vec![comment_row("c1", "first", 0)],
                None,
            )))
            .mount(&server)
            .await;

        let mut fx = fixture();
        let client = client_for(&server.uri());
        fx.manager.expand(&client, "p1", fx.entry_root).await.unwrap();
        let container = fx.manager.thread("p1").unwrap().container();

        assert!(fx.manager.collapse("p1").await.unwrap());
        assert!(!fx.tree.read().is_attached(container));
        assert!(!fx.manager.is_open("p1"));
        assert!(!fx.manager.collapse("p1").await.unwrap());
    }

    #[tokio::test]
    async fn load_more_appends_next_page_and_dedups() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql/SELECT_COMMENTS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(
                vec![comment_row("c1", "first", 0)],
                Some(json!([123, "c1"])),
            )))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql/SELECT_COMMENTS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(
                vec![comment_row("c1", "first", 0), comment_row("c2", "second", 0)],
                None,
            )))
            .mount(&server)
            .await;

        let fx = fixture();
        let client = client_for(&server.uri());
        let tree = Arc::clone(&fx.tree);
        let entry_root = fx.entry_root;
        let manager = Mutex::new(fx.manager);

        manager
            .lock()
            .await
            .expand(&client, "p1", entry_root)
            .await
            .unwrap();
        let appended = ThreadManager::load_more(&manager, &client, "p1")
            .await
            .unwrap();
        assert_eq!(appended, 1);

        let mgr = manager.lock().await;
        let container = mgr.thread("p1").unwrap().container();
        assert_eq!(rendered_comment_ids(&tree, container), vec!["c1", "c2"]);
        // Cursor exhausted; a further load-more is a no-op.
        drop(mgr);
        assert_eq!(
            ThreadManager::load_more(&manager, &client, "p1").await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn concurrent_load_more_is_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql/SELECT_COMMENTS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(
                vec![comment_row("c1", "first", 0)],
                Some(json!([123, "c1"])),
            )))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        // The in-flight page is slow; the duplicate request must not wait
        // for it.
        Mock::given(method("POST"))
            .and(path("/graphql/SELECT_COMMENTS"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(page_body(vec![comment_row("c2", "second", 0)], None))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture();
        let client = client_for(&server.uri());
        let entry_root = fx.entry_root;
        let manager = Mutex::new(fx.manager);
        manager
            .lock()
            .await
            .expand(&client, "p1", entry_root)
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            ThreadManager::load_more(&manager, &client, "p1"),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                ThreadManager::load_more(&manager, &client, "p1").await
            }
        );
        assert_eq!(first.unwrap(), 1);
        assert_eq!(second.unwrap(), 0);
    }

    #[tokio::test]
    async fn refresh_patches_appends_and_removes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql/SELECT_COMMENTS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(
                vec![comment_row("c1", "first", 0), comment_row("gone", "bye", 0)],
                None,
            )))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        // Refetch: c1 gained a like, "gone" vanished, c3 is new. Two rows
        // against display=3 marks the window complete.
        Mock::given(method("POST"))
            .and(path("/graphql/SELECT_COMMENTS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(
                vec![comment_row("c1", "first", 5), comment_row("c3", "third", 0)],
                None,
            )))
            .mount(&server)
            .await;

        let mut fx = fixture();
        let client = client_for(&server.uri());
        fx.manager.expand(&client, "p1", fx.entry_root).await.unwrap();
        let gone_root = fx.manager.comment_entry("p1", "gone").unwrap().root;

        let appended = fx.manager.refresh(&client, "p1").await.unwrap();

        assert_eq!(appended, 1);
        let c1 = fx.manager.comment_entry("p1", "c1").unwrap();
        assert_eq!(fx.tree.read().text_of(c1.like_button), "like 5");
        assert!(!fx.tree.read().is_attached(gone_root));
        assert!(fx.manager.comment("p1", "gone").is_none());
        assert_eq!(fx.manager.comment("p1", "c3").unwrap().body_text, "third");
    }

    #[tokio::test]
    async fn expand_rolls_back_on_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut fx = fixture();
        let client = client_for(&server.uri());
        let result = fx.manager.expand(&client, "p1", fx.entry_root).await;

        assert!(result.is_err());
        assert!(!fx.manager.is_open("p1"));
        // The entry has no leftover thread container.
        let guard = fx.tree.read();
        assert!(guard
            .children(fx.entry_root)
            .iter()
            .all(|&c| guard.attr(c, ROLE_ATTR) != Some("thread")));
    }
}
