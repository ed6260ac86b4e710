//! Activation surface.
//!
//! The overlay only runs on the community board locations. The host is a
//! client-side-routed application, so location changes arrive as full URLs
//! and activation is decided by path prefix, ignoring query and fragment.

use url::Url;

/// Decides whether a host location belongs to the overlay's surface.
#[derive(Debug, Clone)]
pub struct ActivationMatcher {
    prefixes: Vec<String>,
}

impl ActivationMatcher {
    pub fn new(prefixes: impl IntoIterator<Item = String>) -> Self {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(|p| p.trim_end_matches('/').to_string())
                .collect(),
        }
    }

    /// Prefix match on a bare path.
    pub fn matches_path(&self, path: &str) -> bool {
        let path = path.trim_end_matches('/');
        self.prefixes.iter().any(|prefix| {
            path == prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// Match on a full URL; an unparseable URL never activates.
    pub fn matches_url(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) => self.matches_path(parsed.path()),
            Err(e) => {
                tracing::debug!(error = %e, "unparseable location, not activating");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> ActivationMatcher {
        ActivationMatcher::new(vec!["/community/entrystory".to_string()])
    }

    #[test]
    fn board_paths_activate() {
        let m = matcher();
        assert!(m.matches_path("/community/entrystory"));
        assert!(m.matches_path("/community/entrystory/"));
        assert!(m.matches_path("/community/entrystory/list"));
    }

    #[test]
    fn other_paths_do_not() {
        let m = matcher();
        assert!(!m.matches_path("/community"));
        assert!(!m.matches_path("/community/entrystories"));
        assert!(!m.matches_path("/project/1234"));
    }

    #[test]
    fn urls_are_matched_by_path_only() {
        let m = matcher();
        assert!(m.matches_url("https://playentry.org/community/entrystory?sort=created#top"));
        assert!(!m.matches_url("https://playentry.org/community/qna"));
        assert!(!m.matches_url("not a url"));
    }
}
