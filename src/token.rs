//! Centralized-identity bearer tokens.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bearer token failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("missing authorization token")]
    Missing,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token expired")]
    Expired,
    #[error("token verification is not configured")]
    NotConfigured,
}

/// Claims carried by an account token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Account id.
    pub sub: String,
    /// Expiration time (unix seconds).
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Account identity established by a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountClaims {
    pub account_id: String,
    pub email: Option<String>,
}

/// Validates account tokens issued by the identity provider.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<AccountClaims, TokenError>;
}

/// HS256 JWT verifier sharing a secret with the token issuer.
pub struct Hs256Verifier {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256Verifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenVerifier for Hs256Verifier {
    fn verify(&self, token: &str) -> Result<AccountClaims, TokenError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            }
        })?;
        if data.claims.sub.is_empty() {
            return Err(TokenError::Invalid("empty subject".into()));
        }
        Ok(AccountClaims {
            account_id: data.claims.sub,
            email: data.claims.email,
        })
    }
}

/// Extract the token from a `Bearer <token>` header value.
///
/// The scheme is case-insensitive; anything other than exactly two
/// space-separated parts yields `None`.
pub fn extract_bearer(header: &str) -> Option<&str> {
    let mut parts = header.split(' ');
    let scheme = parts.next()?;
    let token = parts.next()?;
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token)
}
