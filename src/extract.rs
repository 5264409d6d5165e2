//! Axum extractors running the authentication modes before a handler.
//!
//! | extractor      | proofs required                         |
//! |----------------|-----------------------------------------|
//! | [`SignedPubkey`] | signed event, no directory lookup     |
//! | [`NostrAuth`]    | signed event from an actively linked key |
//! | [`AccountAuth`]  | bearer token                           |
//! | [`DualProofs`]   | bearer token and signed event, unpaired |
//! | [`DualAuth`]     | bearer token and signed event of a key linked to that account |

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use crate::{
    auth::unix_now,
    binding::RequestTarget,
    context::{AuthContextBuilder, AuthMethod, RequestIdentity},
    error::AuthError,
    event::AuthEvent,
    header::NOSTR_AUTH_HEADER,
    server::AppState,
    token::{extract_bearer, AccountClaims, TokenError},
};

/// Caller proven by a signed event only.
#[derive(Debug, Clone)]
pub struct SignedPubkey(pub RequestIdentity);

/// Caller proven by a signed event from an actively linked pubkey.
#[derive(Debug, Clone)]
pub struct NostrAuth(pub RequestIdentity);

/// Caller proven by a bearer token.
#[derive(Debug, Clone)]
pub struct AccountAuth(pub AccountClaims);

/// Both proofs, verified independently but not yet paired.
#[derive(Debug, Clone)]
pub struct DualProofs {
    pub claims: AccountClaims,
    pub event: AuthEvent,
}

/// Both proofs, and the event signer is linked to the token's account.
#[derive(Debug, Clone)]
pub struct DualAuth(pub RequestIdentity);

fn header_str<'a>(parts: &'a Parts, name: impl header::AsHeaderName) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

fn account_claims(parts: &Parts, state: &AppState) -> Result<AccountClaims, AuthError> {
    let verifier = state.tokens.as_ref().ok_or(TokenError::NotConfigured)?;
    let token = header_str(parts, header::AUTHORIZATION)
        .and_then(extract_bearer)
        .ok_or(TokenError::Missing)?;
    Ok(verifier.verify(token)?)
}

fn signed_event(parts: &Parts, state: &AppState, value: Option<&str>) -> Result<AuthEvent, AuthError> {
    let target = RequestTarget::from_parts(parts, &state.public_scheme);
    state.authenticator.signed_event(value, &target, unix_now())
}

#[async_trait]
impl FromRequestParts<AppState> for SignedPubkey {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AuthError> {
        let value = header_str(parts, NOSTR_AUTH_HEADER)
            .or_else(|| header_str(parts, header::AUTHORIZATION));
        let ev = signed_event(parts, state, value)?;
        Ok(SignedPubkey(
            AuthContextBuilder::new(AuthMethod::Signature)
                .pubkey(ev.pubkey)
                .build(),
        ))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for NostrAuth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AuthError> {
        let target = RequestTarget::from_parts(parts, &state.public_scheme);
        let value = header_str(parts, header::AUTHORIZATION);
        let identity = state
            .authenticator
            .authenticate(value, &target, unix_now())
            .await?;
        Ok(NostrAuth(identity))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AccountAuth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AuthError> {
        Ok(AccountAuth(account_claims(parts, state)?))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for DualProofs {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AuthError> {
        let claims = account_claims(parts, state)?;
        let event = signed_event(parts, state, header_str(parts, NOSTR_AUTH_HEADER))?;
        Ok(DualProofs { claims, event })
    }
}

#[async_trait]
impl FromRequestParts<AppState> for DualAuth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AuthError> {
        let DualProofs { claims, event } = DualProofs::from_request_parts(parts, state).await?;
        let identity = state.dual.combine(&claims, &event.pubkey, None).await?;
        Ok(DualAuth(identity))
    }
}
