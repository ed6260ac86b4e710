//! Credential extraction and storage.
//!
//! The host page embeds everything the API needs: a CSRF token in a meta tag
//! and a session token inside the page's embedded JSON state blob. Access to
//! the page goes through the [`HostPage`] trait so the engine core stays
//! testable; the real binding lives with the injection shim.
//!
//! The session token is looked up through an explicit list of known JSON
//! pointer paths rather than by recursively walking the whole blob: the
//! embedded shape is known, and unbounded traversal of arbitrary host data
//! breaks silently when the host framework changes.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Read access to the host page's embedded data.
pub trait HostPage: Send + Sync {
    /// Content of a `<meta name=...>` tag, if present.
    fn meta_content(&self, name: &str) -> Option<String>;
    /// The page's embedded JSON state blob, if present and parseable.
    fn embedded_state(&self) -> Option<serde_json::Value>;
}

/// Meta tag carrying the CSRF token.
const CSRF_META: &str = "csrf-token";

/// Known locations of the session token inside the embedded state blob.
const SESSION_TOKEN_PATHS: &[&str] = &[
    "/props/initialState/common/user/xToken",
    "/props/pageProps/initialState/common/user/xToken",
    "/props/initialState/user/xToken",
];

/// Known locations of the viewer id. Optional; actions that need it fall
/// back to a viewer lookup through the API.
const VIEWER_ID_PATHS: &[&str] = &[
    "/props/initialState/common/user/id",
    "/props/pageProps/initialState/common/user/id",
];

/// Process-wide API credentials. One instance per session.
#[derive(Clone)]
pub struct Credentials {
    pub csrf_token: SecretString,
    pub session_token: SecretString,
    pub viewer_id: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("csrf_token", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .field("viewer_id", &self.viewer_id)
            .finish()
    }
}

/// Header values for one API request.
#[derive(Clone)]
pub struct AuthHeaders {
    pub csrf_token: String,
    pub session_token: String,
}

#[derive(Default)]
struct Inner {
    creds: Option<Credentials>,
    stale: bool,
}

/// Holds the session credentials, re-extracting on demand.
pub struct TokenStore {
    host: Arc<dyn HostPage>,
    inner: parking_lot::Mutex<Inner>,
}

impl TokenStore {
    pub fn new(host: Arc<dyn HostPage>) -> Self {
        Self {
            host,
            inner: parking_lot::Mutex::new(Inner::default()),
        }
    }

    /// Reads credentials from the host page. Returns false if any required
    /// credential is absent; previously extracted credentials are kept in
    /// that case.
    pub fn extract(&self) -> bool {
        let csrf = match self.host.meta_content(CSRF_META) {
            Some(token) if !token.is_empty() => token,
            _ => return false,
        };
        let state = match self.host.embedded_state() {
            Some(state) => state,
            None => return false,
        };
        let session = match lookup_string(&state, SESSION_TOKEN_PATHS) {
            Some(token) => token,
            None => return false,
        };
        let viewer_id = lookup_string(&state, VIEWER_ID_PATHS);

        let mut inner = self.inner.lock();
        inner.creds = Some(Credentials {
            csrf_token: SecretString::from(csrf),
            session_token: SecretString::from(session),
            viewer_id,
        });
        inner.stale = false;
        true
    }

    /// Polls [`extract`](Self::extract) until credentials are available or
    /// the retry budget is exhausted. Used to avoid racing feed actions
    /// against a page transition that has not finished hydrating yet.
    pub async fn ensure_ready(&self, max_retries: u32, retry_delay: Duration) -> bool {
        for attempt in 0..=max_retries {
            if self.is_ready() || self.extract() {
                return true;
            }
            if attempt < max_retries {
                tokio::time::sleep(retry_delay).await;
            }
        }
        tracing::warn!(max_retries, "credentials unavailable after retry budget");
        false
    }

    fn is_ready(&self) -> bool {
        let inner = self.inner.lock();
        inner.creds.is_some() && !inner.stale
    }

    /// Marks the stored credentials stale. The next `ensure_ready` call will
    /// re-extract. Called by the fetch client when a response carries the
    /// auth-failure signature.
    pub fn mark_stale(&self) {
        self.inner.lock().stale = true;
        tracing::debug!("credentials marked stale");
    }

    /// Header values for a request, if credentials are available.
    pub fn headers(&self) -> Option<AuthHeaders> {
        let inner = self.inner.lock();
        inner.creds.as_ref().map(|c| AuthHeaders {
            csrf_token: c.csrf_token.expose_secret().to_string(),
            session_token: c.session_token.expose_secret().to_string(),
        })
    }

    pub fn viewer_id(&self) -> Option<String> {
        self.inner.lock().creds.as_ref()?.viewer_id.clone()
    }

    /// Records the viewer id resolved through the API after extraction.
    pub fn set_viewer_id(&self, id: String) {
        if let Some(creds) = self.inner.lock().creds.as_mut() {
            creds.viewer_id = Some(id);
        }
    }

    /// Drops all credentials. Part of the deactivation lifecycle.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::default();
    }
}

fn lookup_string(state: &serde_json::Value, paths: &[&str]) -> Option<String> {
    paths
        .iter()
        .find_map(|path| state.pointer(path))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
