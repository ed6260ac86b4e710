//! Engine configuration.
//!
//! All fields use `#[serde(default)]` so any subset of keys can be supplied
//! (the injection shim passes configuration through as JSON); missing keys
//! fall back to the defaults below, which match the cadences and retry
//! budgets the overlay shipped with.

use serde::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the GraphQL endpoint family. Overridable so tests can
    /// point the engine at a local mock server.
    pub graphql_base: String,

    /// Refresh cadence while the user is viewing the fresh-posts section.
    pub recent_refresh_ms: u64,

    /// Refresh cadence for visible comment threads while the user is
    /// scrolled into the paginated "older" section.
    pub background_refresh_ms: u64,

    /// Maximum number of posts kept in the fresh section.
    pub max_posts: usize,

    /// Posts requested per page.
    pub page_size: u32,

    /// Comments requested per thread page.
    pub comment_page_size: u32,

    /// Retry bound for a single API request.
    pub fetch_retries: u32,

    /// Base delay of the exponential backoff between retries.
    pub fetch_base_delay_ms: u64,

    /// Growth factor of the exponential backoff.
    pub fetch_backoff_growth: f64,

    /// Retry bound for credential extraction after a page transition.
    pub token_retries: u32,

    /// Delay between credential extraction attempts.
    pub token_retry_delay_ms: u64,

    /// Cadence of the TLD list refresh.
    pub tld_refresh_ms: u64,

    /// Overrides the IANA TLD list endpoint. Tests point this at a local
    /// mock server; `None` uses the public list.
    pub tld_list_url: Option<String>,

    /// How long a cached TLD list stays usable as a fallback.
    pub tld_cache_window_ms: u64,

    /// Path prefixes on which the overlay activates.
    pub activation_paths: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            graphql_base: "https://playentry.org".to_string(),
            recent_refresh_ms: 1_000,
            background_refresh_ms: 3_000,
            max_posts: 50,
            page_size: 20,
            comment_page_size: 10,
            fetch_retries: 3,
            fetch_base_delay_ms: 1_000,
            fetch_backoff_growth: 1.5,
            token_retries: 3,
            token_retry_delay_ms: 300,
            tld_refresh_ms: 60 * 60 * 1_000,
            tld_list_url: None,
            tld_cache_window_ms: 7 * 24 * 60 * 60 * 1_000,
            activation_paths: vec!["/community/entrystory".to_string()],
        }
    }
}

impl Config {
    pub fn recent_refresh(&self) -> Duration {
        Duration::from_millis(self.recent_refresh_ms)
    }

    pub fn background_refresh(&self) -> Duration {
        Duration::from_millis(self.background_refresh_ms)
    }

    pub fn fetch_base_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_base_delay_ms)
    }

    pub fn token_retry_delay(&self) -> Duration {
        Duration::from_millis(self.token_retry_delay_ms)
    }

    pub fn tld_refresh(&self) -> Duration {
        Duration::from_millis(self.tld_refresh_ms)
    }

    pub fn tld_cache_window(&self) -> Duration {
        Duration::from_millis(self.tld_cache_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(config.recent_refresh() < config.background_refresh());
        assert!(config.fetch_backoff_growth > 1.0);
        assert!(!config.activation_paths.is_empty());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"recent_refresh_ms": 5000, "max_posts": 10}"#).unwrap();
        assert_eq!(config.recent_refresh_ms, 5_000);
        assert_eq!(config.max_posts, 10);
        assert_eq!(config.background_refresh_ms, 3_000);
        assert_eq!(config.graphql_base, "https://playentry.org");
    }
}
