//! Periodic refresh loop.
//!
//! One task drives three cadences: the feed refresh while the viewer is near
//! the top of the list, the comment refresh for open threads, and the slow
//! TLD list update. Refresh failures are logged and swallowed; the next tick
//! tries again. An auth-failure signature triggers one credential
//! re-extraction so the following cycle can succeed, without replaying the
//! failed request.

use crate::config::Config;
use crate::dom::SharedTree;
use crate::feed::reconciler::FeedView;
use crate::feed::thread::ThreadManager;
use crate::feed::types::FeedItem;
use crate::net::{ApiClient, FeedQuery};
use crate::util::{TldCacheStore, TldList};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Scroll offset below which the viewer counts as watching the recent
/// window.
const RECENT_SCROLL_THRESHOLD: f64 = 400.0;

pub struct Scheduler {
    client: Arc<ApiClient>,
    http: reqwest::Client,
    view: Arc<Mutex<FeedView>>,
    threads: Arc<Mutex<ThreadManager>>,
    tree: SharedTree,
    tld_store: Arc<dyn TldCacheStore>,
    tld_url: Option<String>,
    query: FeedQuery,
    recent_interval: Duration,
    background_interval: Duration,
    tld_interval: Duration,
    tld_cache_window: Duration,
    page_size: u32,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<ApiClient>,
        http: reqwest::Client,
        view: Arc<Mutex<FeedView>>,
        threads: Arc<Mutex<ThreadManager>>,
        tree: SharedTree,
        tld_store: Arc<dyn TldCacheStore>,
        config: &Config,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            http,
            view,
            threads,
            tree,
            tld_store,
            tld_url: config.tld_list_url.clone(),
            query: FeedQuery::default(),
            recent_interval: config.recent_refresh(),
            background_interval: config.background_refresh(),
            tld_interval: config.tld_refresh(),
            tld_cache_window: config.tld_cache_window(),
            page_size: config.page_size,
            shutdown,
        }
    }

    pub fn with_query(mut self, query: FeedQuery) -> Self {
        self.query = query;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let start = tokio::time::Instant::now();
        // The engine does the initial fetches itself; every interval starts
        // with its first tick one period out.
        let mut recent =
            tokio::time::interval_at(start + self.recent_interval, self.recent_interval);
        let mut background = tokio::time::interval_at(
            start + self.background_interval,
            self.background_interval,
        );
        let mut tld = tokio::time::interval_at(start + self.tld_interval, self.tld_interval);
        recent.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        background.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tld.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = recent.tick() => {
                    if self.viewing_recent() {
                        self.refresh_feed().await;
                    }
                }
                _ = background.tick() => {
                    self.refresh_threads().await;
                }
                _ = tld.tick() => {
                    self.refresh_tlds().await;
                }
                result = self.shutdown.changed() => {
                    if result.is_err() || *self.shutdown.borrow() {
                        tracing::debug!("refresh loop stopping");
                        break;
                    }
                }
            }
        }
    }

    fn viewing_recent(&self) -> bool {
        self.tree.read().scroll_top() <= RECENT_SCROLL_THRESHOLD
    }

    async fn refresh_feed(&self) {
        let page = match self
            .client
            .list_posts(&self.query, self.page_size, None)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(error = %e, "feed refresh failed");
                if e.is_auth_failure() {
                    // Re-extract for the next cycle; the failed request is
                    // not replayed.
                    let recovered = self.client.tokens().extract();
                    tracing::debug!(recovered, "credentials re-extracted");
                }
                return;
            }
        };
        let items: Vec<FeedItem> = page.list.into_iter().map(FeedItem::from).collect();

        let mut view = self.view.lock().await;
        match view.reconcile(&items).await {
            Ok(outcome) => {
                view.set_cursor(page.search_after);
                drop(view);
                if !outcome.removed.is_empty() {
                    let mut threads = self.threads.lock().await;
                    for id in &outcome.removed {
                        threads.forget(id);
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "feed reconciliation failed"),
        }
    }

    async fn refresh_threads(&self) {
        let open = self.threads.lock().await.open_ids();
        for post_id in open {
            let mut threads = self.threads.lock().await;
            if let Err(e) = threads.refresh(&self.client, &post_id).await {
                tracing::warn!(post_id = %post_id, error = %e, "thread refresh failed");
            }
        }
    }

    async fn refresh_tlds(&self) {
        match TldList::refresh(
            &self.http,
            self.tld_store.as_ref(),
            self.tld_cache_window,
            self.tld_url.as_deref(),
        )
        .await
        {
            Ok(list) => {
                self.view.lock().await.set_tlds(list.clone());
                self.threads.lock().await.set_tlds(list);
            }
            Err(e) => tracing::warn!(error = %e, "TLD list refresh failed"),
        }
    }
}
