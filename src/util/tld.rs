//! TLD validation list with cached fallback.
//!
//! The authoritative list comes from IANA on a long cadence. When the remote
//! fetch fails, a previously cached copy is used as long as it is younger
//! than the staleness window; a built-in baseline set is always merged in so
//! link detection keeps working even on a cold, offline start.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

const IANA_TLD_URL: &str = "https://data.iana.org/TLD/tlds-alpha-by-domain.txt";

/// TLDs that are always considered valid, remote list or not.
const BASELINE_TLDS: &[&str] = &[
    "com", "org", "net", "edu", "gov", "mil", "int", "co", "io", "me", "tv", "kr", "jp", "cn",
    "uk", "de", "fr", "it", "es", "ru", "ca", "au", "br", "info", "biz", "name", "pro", "dev",
    "app", "asia",
];

#[derive(Debug, Error)]
pub enum TldError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("remote fetch failed and no usable cached list")]
    NoUsableList,
}

/// Snapshot persisted through a [`TldCacheStore`].
#[derive(Debug, Clone)]
pub struct CachedTlds {
    pub tlds: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Persistence seam for the cached list. The injection shim backs this with
/// browser storage; tests use an in-memory implementation.
pub trait TldCacheStore: Send + Sync {
    fn load(&self) -> Option<CachedTlds>;
    fn save(&self, snapshot: &CachedTlds);
}

/// Validated set of top-level domains.
#[derive(Debug, Clone)]
pub struct TldList {
    tlds: HashSet<String>,
}

impl TldList {
    /// The built-in baseline only.
    pub fn baseline() -> Self {
        Self {
            tlds: BASELINE_TLDS.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn contains(&self, tld: &str) -> bool {
        self.tlds.contains(&tld.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.tlds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tlds.is_empty()
    }

    fn from_lines(text: &str) -> Self {
        let mut list = Self::baseline();
        for line in text.lines().skip(1) {
            let line = line.trim().to_ascii_lowercase();
            if !line.is_empty() && !line.starts_with('#') {
                list.tlds.insert(line);
            }
        }
        list
    }

    /// Refreshes the list from IANA, falling back to the cached copy (if
    /// within `cache_window`) and finally to the baseline.
    pub async fn refresh(
        client: &reqwest::Client,
        store: &dyn TldCacheStore,
        cache_window: Duration,
        base_url: Option<&str>,
    ) -> Result<Self, TldError> {
        let url = base_url.unwrap_or(IANA_TLD_URL);
        match Self::fetch(client, url).await {
            Ok(list) => {
                store.save(&CachedTlds {
                    tlds: list.tlds.iter().cloned().collect(),
                    fetched_at: Utc::now(),
                });
                Ok(list)
            }
            Err(e) => {
                tracing::warn!(error = %e, "TLD list fetch failed, trying cached copy");
                if let Some(cached) = store.load() {
                    let age = Utc::now().signed_duration_since(cached.fetched_at);
                    if age.to_std().map(|a| a <= cache_window).unwrap_or(false) {
                        let mut list = Self::baseline();
                        list.tlds.extend(cached.tlds);
                        return Ok(list);
                    }
                    tracing::debug!("cached TLD list is past the staleness window");
                }
                Err(TldError::NoUsableList)
            }
        }
    }

    async fn fetch(client: &reqwest::Client, url: &str) -> Result<Self, TldError> {
        let response = client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(TldError::HttpStatus(response.status().as_u16()));
        }
        let text = response.text().await?;
        Ok(Self::from_lines(&text))
    }
}
