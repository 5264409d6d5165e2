//! Binding a verified event to the HTTP request it claims to authorize.

use axum::http::{header, request::Parts};
use thiserror::Error;

use crate::event::{AuthEvent, HTTP_AUTH_KIND};

/// Maximum distance, in seconds, between `created_at` and the server clock.
pub const FRESHNESS_WINDOW_SECS: i64 = 60;

/// Reasons a verified event does not authorize a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("invalid event kind {0}")]
    WrongKind(u32),
    #[error("event timestamp out of range")]
    TimestampOutOfRange,
    #[error("missing u tag")]
    MissingUrlTag,
    #[error("URL mismatch")]
    UrlMismatch,
    #[error("missing method tag")]
    MissingMethodTag,
    #[error("method mismatch")]
    MethodMismatch,
}

/// The parts of an HTTP request an event must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    /// Absolute URL: scheme, host, path and raw query string.
    pub url: String,
    /// HTTP method as sent, e.g. `POST`.
    pub method: String,
}

impl RequestTarget {
    pub fn new(url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
        }
    }

    /// Reconstruct the request URL from its parts, using `scheme` since the
    /// server may sit behind a TLS-terminating proxy.
    pub fn from_parts(parts: &Parts, scheme: &str) -> Self {
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        Self {
            url: format!("{scheme}://{host}{path_and_query}"),
            method: parts.method.as_str().to_string(),
        }
    }
}

/// Check that `ev` authorizes `target` at time `now` (unix seconds).
pub fn bind(ev: &AuthEvent, target: &RequestTarget, now: i64) -> Result<(), BindError> {
    if ev.kind != HTTP_AUTH_KIND {
        return Err(BindError::WrongKind(ev.kind));
    }
    if now.abs_diff(ev.created_at) > FRESHNESS_WINDOW_SECS as u64 {
        return Err(BindError::TimestampOutOfRange);
    }
    let url = ev.tag_value("u").ok_or(BindError::MissingUrlTag)?;
    if url != target.url {
        tracing::debug!(expected = %target.url, presented = %url, "URL mismatch");
        return Err(BindError::UrlMismatch);
    }
    let method = ev.tag_value("method").ok_or(BindError::MissingMethodTag)?;
    if method != target.method {
        return Err(BindError::MethodMismatch);
    }
    Ok(())
}
