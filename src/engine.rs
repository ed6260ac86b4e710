//! Engine lifecycle: activation, the live session, teardown.
//!
//! A session wires the whole stack together: credentials from the host page,
//! the API client, the mutation queue over the shared tree, the feed view,
//! its comment threads and the refresh loop. Activation is idempotent per
//! location; leaving the surface tears everything down and detaches every
//! overlay-owned node.

use crate::auth::{HostPage, TokenStore};
use crate::config::Config;
use crate::dom::{DomError, DomTree, MutationQueue, NodeId, NodeSpec, SharedTree};
use crate::feed::{
    Actions, FeedItem, FeedView, Scheduler, StickerCatalog, ThreadError, ThreadManager,
};
use crate::net::{ApiClient, ApiError, FeedQuery};
use crate::page::ActivationMatcher;
use crate::util::{TldCacheStore, TldList};
use parking_lot::{Mutex as SyncMutex, RwLock};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("credentials unavailable")]
    CredentialUnavailable,
    #[error("overlay is not active")]
    Inactive,
    #[error("no rendered entry for target")]
    UnknownEntry,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error(transparent)]
    Thread(#[from] ThreadError),
}

struct Session {
    tokens: Arc<TokenStore>,
    client: Arc<ApiClient>,
    queue: Arc<MutationQueue>,
    view: Arc<Mutex<FeedView>>,
    threads: Arc<Mutex<ThreadManager>>,
    stickers: Arc<Mutex<StickerCatalog>>,
    actions: Actions,
    shutdown: watch::Sender<bool>,
    refresh_task: JoinHandle<()>,
    container: NodeId,
}

/// The overlay engine. One per injected page.
pub struct Engine {
    config: Config,
    host: Arc<dyn HostPage>,
    tld_store: Arc<dyn TldCacheStore>,
    http: reqwest::Client,
    matcher: ActivationMatcher,
    tree: SharedTree,
    session: Option<Session>,
}

impl Engine {
    pub fn new(
        config: Config,
        host: Arc<dyn HostPage>,
        tld_store: Arc<dyn TldCacheStore>,
    ) -> Self {
        let matcher = ActivationMatcher::new(config.activation_paths.clone());
        Self {
            host,
            tld_store,
            http: reqwest::Client::new(),
            matcher,
            tree: Arc::new(RwLock::new(DomTree::new())),
            session: None,
            config,
        }
    }

    pub fn tree(&self) -> SharedTree {
        Arc::clone(&self.tree)
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Reacts to a host location change: activates on the board surface,
    /// tears down anywhere else. Resolves to the resulting active state.
    pub async fn handle_location(
        &mut self,
        url: &str,
        mount: NodeId,
    ) -> Result<bool, EngineError> {
        if self.matcher.matches_url(url) {
            self.activate(mount).await?;
            Ok(true)
        } else {
            self.deactivate().await?;
            Ok(false)
        }
    }

    /// Brings up a session under `mount`. A no-op when already active.
    pub async fn activate(&mut self, mount: NodeId) -> Result<(), EngineError> {
        if self.session.is_some() {
            return Ok(());
        }

        let tokens = Arc::new(TokenStore::new(Arc::clone(&self.host)));
        if !tokens
            .ensure_ready(self.config.token_retries, self.config.token_retry_delay())
            .await
        {
            return Err(EngineError::CredentialUnavailable);
        }
        let client = Arc::new(ApiClient::new(
            self.http.clone(),
            self.config.graphql_base.clone(),
            Arc::clone(&tokens),
            self.config.fetch_retries,
            self.config.fetch_base_delay(),
            self.config.fetch_backoff_growth,
        ));
        if tokens.viewer_id().is_none() {
            match client.viewer_id().await {
                Ok(Some(id)) => tokens.set_viewer_id(id),
                Ok(None) => {}
                Err(e) => tracing::debug!(error = %e, "viewer id lookup failed"),
            }
        }

        let queue = Arc::new(MutationQueue::new(Arc::clone(&self.tree)));
        let slot: Arc<SyncMutex<Option<NodeId>>> = Arc::new(SyncMutex::new(None));
        let sink = Arc::clone(&slot);
        queue
            .enqueue_op(move |tree| async move {
                let mut guard = tree.write();
                let ul = guard.append(mount, NodeSpec::element("ul").attr("data-role", "feed"))?;
                *sink.lock() = Some(ul);
                Ok(())
            })
            .await?;
        let container = slot.lock().take().ok_or(DomError::Detached)?;

        let tlds = match TldList::refresh(
            &self.http,
            self.tld_store.as_ref(),
            self.config.tld_cache_window(),
            self.config.tld_list_url.as_deref(),
        )
        .await
        {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, "starting with the baseline TLD list");
                TldList::baseline()
            }
        };

        let view = Arc::new(Mutex::new(FeedView::new(
            Arc::clone(&queue),
            container,
            tlds.clone(),
            self.config.max_posts,
        )));
        let threads = Arc::new(Mutex::new(ThreadManager::new(
            Arc::clone(&queue),
            tlds,
            self.config.comment_page_size,
        )));

        let page = match client
            .list_posts(&FeedQuery::default(), self.config.page_size, None)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                // Leave no trace of the failed bring-up.
                let _ = queue
                    .enqueue_on(container, move |t| t.remove(container))
                    .await;
                queue.shutdown();
                return Err(e.into());
            }
        };
        let items: Vec<FeedItem> = page.list.into_iter().map(FeedItem::from).collect();
        {
            let mut view = view.lock().await;
            view.reconcile(&items).await?;
            view.set_cursor(page.search_after);
        }

        let actions = Actions::new(Arc::clone(&client), Arc::clone(&view), Arc::clone(&threads));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let refresh_task = Scheduler::new(
            Arc::clone(&client),
            self.http.clone(),
            Arc::clone(&view),
            Arc::clone(&threads),
            Arc::clone(&self.tree),
            Arc::clone(&self.tld_store),
            &self.config,
            shutdown_rx,
        )
        .spawn();

        tracing::info!(posts = items.len(), "overlay activated");
        self.session = Some(Session {
            tokens,
            client,
            queue,
            view,
            threads,
            stickers: Arc::new(Mutex::new(StickerCatalog::new())),
            actions,
            shutdown,
            refresh_task,
            container,
        });
        Ok(())
    }

    /// Tears the session down: refresh loop stopped, overlay subtree
    /// detached, queue closed, credentials dropped. A no-op when inactive.
    pub async fn deactivate(&mut self) -> Result<(), EngineError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let _ = session.shutdown.send(true);
        if let Err(e) = session.refresh_task.await {
            if !e.is_cancelled() {
                tracing::warn!(error = %e, "refresh loop ended abnormally");
            }
        }

        session.view.lock().await.clear();
        let container = session.container;
        match session
            .queue
            .enqueue_on(container, move |t| t.remove(container))
            .await
        {
            Ok(()) | Err(DomError::Detached) => {}
            Err(e) => return Err(e.into()),
        }
        session.queue.shutdown();
        session.tokens.reset();
        tracing::info!("overlay deactivated");
        Ok(())
    }

    fn session(&self) -> Result<&Session, EngineError> {
        self.session.as_ref().ok_or(EngineError::Inactive)
    }

    pub fn actions(&self) -> Result<&Actions, EngineError> {
        Ok(&self.session()?.actions)
    }

    pub fn view(&self) -> Result<Arc<Mutex<FeedView>>, EngineError> {
        Ok(Arc::clone(&self.session()?.view))
    }

    pub fn threads(&self) -> Result<Arc<Mutex<ThreadManager>>, EngineError> {
        Ok(Arc::clone(&self.session()?.threads))
    }

    /// The session's sticker catalog, loaded lazily through
    /// [`sticker_tabs`](Self::sticker_tabs) or the catalog's own methods.
    pub fn stickers(&self) -> Result<Arc<Mutex<StickerCatalog>>, EngineError> {
        Ok(Arc::clone(&self.session()?.stickers))
    }

    /// Ensures the sticker category tabs are loaded. Resolves to the tab
    /// count.
    pub async fn sticker_tabs(&self) -> Result<usize, EngineError> {
        let session = self.session()?;
        let mut catalog = session.stickers.lock().await;
        Ok(catalog.load_tabs(&session.client).await?)
    }

    /// Opens or closes an entry's comment thread. Resolves to the new open
    /// state.
    pub async fn toggle_thread(&self, post_id: &str) -> Result<bool, EngineError> {
        let session = self.session()?;
        let is_open = session.threads.lock().await.is_open(post_id);
        if is_open {
            session.threads.lock().await.collapse(post_id).await?;
            if let Some(ui) = session.view.lock().await.ui_mut(post_id) {
                ui.comments_open = false;
            }
            Ok(false)
        } else {
            let root = session
                .view
                .lock()
                .await
                .entry(post_id)
                .ok_or(EngineError::UnknownEntry)?
                .nodes
                .root;
            session
                .threads
                .lock()
                .await
                .expand(&session.client, post_id, root)
                .await?;
            if let Some(ui) = session.view.lock().await.ui_mut(post_id) {
                ui.comments_open = true;
            }
            Ok(true)
        }
    }

    /// Loads the next page of posts into the older section. Resolves to the
    /// number appended; a call while one is in flight is dropped with zero.
    pub async fn load_more_posts(&self) -> Result<usize, EngineError> {
        let session = self.session()?;
        let cursor = {
            let mut view = session.view.lock().await;
            if !view.begin_load_more() {
                return Ok(0);
            }
            view.cursor().cloned()
        };

        let result = session
            .client
            .list_posts(&FeedQuery::default(), self.config.page_size, cursor.as_ref())
            .await;
        let mut view = session.view.lock().await;
        let page = match result {
            Ok(page) => page,
            Err(e) => {
                view.end_load_more();
                return Err(e.into());
            }
        };
        let items: Vec<FeedItem> = page.list.into_iter().map(FeedItem::from).collect();
        let appended = match view.append_older(&items).await {
            Ok(ids) => ids.len(),
            Err(e) => {
                view.end_load_more();
                return Err(e.into());
            }
        };
        view.set_cursor(page.search_after);
        view.end_load_more();
        Ok(appended)
    }

    /// Loads the next page of an open comment thread.
    pub async fn load_more_comments(&self, post_id: &str) -> Result<usize, EngineError> {
        let session = self.session()?;
        Ok(ThreadManager::load_more(&session.threads, &session.client, post_id).await?)
    }
}
