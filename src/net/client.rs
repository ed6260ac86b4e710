//! Retrying GraphQL fetch client.
//!
//! Transport failures and server errors are retried up to a fixed bound with
//! exponential backoff; the backoff is a pure function of the attempt number.
//! An auth-failure signature in a non-JSON response body marks the token
//! store stale as a side channel; the request is NOT replayed with fresh
//! tokens automatically, the caller re-invokes on its next cycle.

use crate::auth::TokenStore;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Substrings the API uses when a request is rejected for credential
/// reasons (typically inside an HTML error page).
const AUTH_FAILURE_MARKERS: &[&str] = &["form tampered with", "token"];

#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level error (DNS, connection, TLS) after all retries.
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Non-2xx HTTP status that is not retryable.
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// No usable credentials at request time.
    #[error("credentials unavailable")]
    CredentialUnavailable,
    /// The server signalled an invalid or stale token.
    #[error("server rejected credentials")]
    AuthRejected,
    /// The response body was not the expected JSON (most often an HTML
    /// error/login page). Treated as auth-adjacent: tokens are re-extracted.
    #[error("malformed response body")]
    MalformedResponse,
    /// The GraphQL envelope carried errors.
    #[error("API returned errors: {0}")]
    Graphql(String),
    /// The expected data key was absent from the envelope.
    #[error("missing data in response: {0}")]
    MissingData(&'static str),
}

impl ApiError {
    /// Auth-failure signatures trigger token re-extraction at the store.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::AuthRejected | ApiError::MalformedResponse)
    }
}

/// Backoff before retry `attempt` (0-based): `base × growth ^ attempt`.
///
/// Pure function of the attempt number; there is no shared retry counter
/// anywhere in the client.
pub fn backoff_delay(base: Duration, growth: f64, attempt: u32) -> Duration {
    base.mul_f64(growth.powi(attempt as i32))
}

/// GraphQL client bound to one endpoint family and one token store.
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    tokens: Arc<TokenStore>,
    max_retries: u32,
    base_delay: Duration,
    growth: f64,
}

impl ApiClient {
    pub fn new(
        http: reqwest::Client,
        base: impl Into<String>,
        tokens: Arc<TokenStore>,
        max_retries: u32,
        base_delay: Duration,
        growth: f64,
    ) -> Self {
        Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            tokens,
            max_retries,
            base_delay,
            growth,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Executes a named GraphQL operation and returns the envelope's `data`.
    pub async fn graphql(
        &self,
        operation: &'static str,
        query: &'static str,
        variables: Value,
    ) -> Result<Value, ApiError> {
        let headers = self
            .tokens
            .headers()
            .ok_or(ApiError::CredentialUnavailable)?;
        let url = format!("{}/graphql/{}", self.base, operation);
        let body = serde_json::json!({ "query": query, "variables": variables });

        let response = {
            let mut attempt = 0u32;
            loop {
                let result = self
                    .http
                    .post(&url)
                    .header("accept", "*/*")
                    .header("csrf-token", &headers.csrf_token)
                    .header("x-token", &headers.session_token)
                    .header("x-client-type", "Client")
                    .json(&body)
                    .send()
                    .await;

                match result {
                    Ok(response) if response.status().is_server_error() => {
                        if attempt >= self.max_retries {
                            break Err(ApiError::HttpStatus(response.status().as_u16()));
                        }
                        let delay = backoff_delay(self.base_delay, self.growth, attempt);
                        tracing::warn!(
                            operation,
                            status = response.status().as_u16(),
                            retry = attempt,
                            delay_ms = delay.as_millis() as u64,
                            "server error, retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Ok(response) if !response.status().is_success() => {
                        break Err(ApiError::HttpStatus(response.status().as_u16()));
                    }
                    Ok(response) => break Ok(response),
                    Err(e) if attempt < self.max_retries => {
                        let delay = backoff_delay(self.base_delay, self.growth, attempt);
                        tracing::warn!(
                            operation,
                            error = %e,
                            retry = attempt,
                            delay_ms = delay.as_millis() as u64,
                            "transport error, retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    // Final failure surfaces the original transport error.
                    Err(e) => break Err(ApiError::Network(e)),
                }
            }
        }?;

        let text = response.text().await.map_err(ApiError::Network)?;
        let envelope: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) => {
                // Non-JSON body: the endpoint served an HTML error/login page.
                self.tokens.mark_stale();
                let lowered = text.to_lowercase();
                if AUTH_FAILURE_MARKERS.iter().any(|m| lowered.contains(m)) {
                    tracing::warn!(operation, "auth-failure signature in response body");
                    return Err(ApiError::AuthRejected);
                }
                tracing::warn!(operation, "non-JSON response body");
                return Err(ApiError::MalformedResponse);
            }
        };

        if let Some(errors) = envelope.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let joined = errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(ApiError::Graphql(joined));
            }
        }

        envelope
            .get("data")
            .cloned()
            .ok_or(ApiError::MissingData("data"))
    }
}
