//! `Authorization: Nostr <base64>` header codec.

use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;

use crate::event::AuthEvent;

/// Header carrying the Nostr event alongside a bearer token, and for
/// signature-only endpoints.
pub const NOSTR_AUTH_HEADER: &str = "x-nostr-authorization";

const SCHEME: &str = "Nostr ";

/// Malformed authorization headers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("missing Authorization header")]
    Missing,
    #[error("invalid Authorization scheme")]
    Scheme,
    #[error("invalid base64 encoding")]
    Base64,
    #[error("invalid event JSON: {0}")]
    Json(String),
}

/// Decode the event carried by a `Nostr <base64>` header value.
pub fn decode_event(value: &str) -> Result<AuthEvent, HeaderError> {
    let encoded = value.strip_prefix(SCHEME).ok_or(HeaderError::Scheme)?;
    let data = STANDARD
        .decode(encoded.trim())
        .map_err(|_| HeaderError::Base64)?;
    serde_json::from_slice(&data).map_err(|e| HeaderError::Json(e.to_string()))
}

/// Encode an event as a `Nostr <base64>` header value.
pub fn encode_event(ev: &AuthEvent) -> String {
    let json = serde_json::to_vec(ev).unwrap_or_default();
    format!("{SCHEME}{}", STANDARD.encode(json))
}
