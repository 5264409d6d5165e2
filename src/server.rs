//! HTTP endpoints for health checks, pubkey linking and authenticated routes.

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use crate::{
    auth::NostrAuthenticator,
    context::RequestIdentity,
    directory::IdentityDirectory,
    dual::DualAuthCombinator,
    error::AuthError,
    extract::{AccountAuth, DualAuth, DualProofs, NostrAuth, SignedPubkey},
    link::IdentityLinkService,
    store::RecordStore,
    token::TokenVerifier,
    touch::TouchQueue,
};

/// Shared state handed to every handler and extractor.
#[derive(Clone)]
pub struct AppState {
    pub authenticator: NostrAuthenticator,
    pub links: IdentityLinkService,
    pub dual: DualAuthCombinator,
    /// `None` when no token secret is configured; token routes then reject.
    pub tokens: Option<Arc<dyn TokenVerifier>>,
    /// Scheme used to rebuild request URLs.
    pub public_scheme: String,
    pub commit_sha: String,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, touches: TouchQueue, timeout: Duration) -> Self {
        let directory = IdentityDirectory::new(store.clone(), timeout, touches);
        Self {
            authenticator: NostrAuthenticator::new(directory.clone()),
            links: IdentityLinkService::new(store, directory.clone(), timeout),
            dual: DualAuthCombinator::new(directory),
            tokens: None,
            public_scheme: "http".into(),
            commit_sha: "unknown".into(),
        }
    }

    pub fn with_tokens(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.tokens = Some(verifier);
        self
    }

    pub fn with_public_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.public_scheme = scheme.into();
        self
    }

    pub fn with_commit_sha(mut self, sha: impl Into<String>) -> Self {
        self.commit_sha = sha.into();
        self
    }
}

/// Response body for the `/heartbeat` endpoint.
#[derive(Serialize, Deserialize)]
struct Heartbeat {
    /// Always "ok" when the server is running.
    status: String,
    commit_sha: String,
}

#[derive(Deserialize, Default)]
struct PubkeyBody {
    #[serde(default)]
    pubkey: String,
}

#[derive(Serialize, Deserialize)]
struct LinkResponse {
    success: bool,
    message: String,
    account_id: String,
    pubkey: String,
    linked_at: String,
}

#[derive(Serialize, Deserialize)]
struct UnlinkResponse {
    success: bool,
    message: String,
    pubkey: String,
}

#[derive(Serialize, Deserialize)]
struct LinkedPubkey {
    pubkey: String,
    display_pubkey: String,
    linked_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_used_at: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct LinkedPubkeys {
    success: bool,
    account_id: String,
    linked_pubkeys: Vec<LinkedPubkey>,
}

#[derive(Serialize, Deserialize)]
struct LinkStatus {
    success: bool,
    pubkey: String,
    is_linked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    account_id: Option<String>,
}

/// All routes, with `state` attached.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/heartbeat", get(heartbeat))
        .route("/v1/auth/get-linked-pubkeys", get(get_linked_pubkeys))
        .route("/v1/auth/link-pubkey", post(link_pubkey))
        .route("/v1/auth/unlink-pubkey", post(unlink_pubkey))
        .route("/v1/auth/check-pubkey-link", post(check_pubkey_link))
        .route("/v1/protected/me", get(protected_me))
        .route("/v1/protected/account", get(protected_account))
        .with_state(state)
}

/// Start the HTTP server and run until `shutdown` resolves.
pub async fn serve_http(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "http listening");
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn heartbeat(State(state): State<AppState>) -> Json<Heartbeat> {
    Json(Heartbeat {
        status: "ok".to_string(),
        commit_sha: state.commit_sha.clone(),
    })
}

async fn link_pubkey(
    State(state): State<AppState>,
    DualProofs { claims, event }: DualProofs,
    body: Bytes,
) -> Result<Json<LinkResponse>, AuthError> {
    // The body is optional; an unparsable one is treated as absent.
    let declared = serde_json::from_slice::<PubkeyBody>(&body)
        .unwrap_or_default()
        .pubkey;
    let identity = DualAuthCombinator::proofs(&claims, &event.pubkey, Some(&declared))?;
    let link = state.links.link(&event.pubkey, &claims.account_id).await?;
    Ok(Json(LinkResponse {
        success: true,
        message: "pubkey linked".into(),
        account_id: identity.account_id.unwrap_or_default(),
        pubkey: link.pubkey,
        linked_at: link.linked_at.to_rfc3339(),
    }))
}

async fn unlink_pubkey(
    State(state): State<AppState>,
    AccountAuth(claims): AccountAuth,
    body: Bytes,
) -> Result<Json<UnlinkResponse>, AuthError> {
    let req: PubkeyBody = serde_json::from_slice(&body)
        .map_err(|_| AuthError::BadRequest("expected {\"pubkey\": ...}".into()))?;
    if req.pubkey.is_empty() {
        return Err(AuthError::BadRequest("pubkey is required".into()));
    }
    state.links.unlink(&req.pubkey, &claims.account_id).await?;
    Ok(Json(UnlinkResponse {
        success: true,
        message: "pubkey unlinked".into(),
        pubkey: req.pubkey,
    }))
}

async fn get_linked_pubkeys(
    State(state): State<AppState>,
    AccountAuth(claims): AccountAuth,
) -> Result<Json<LinkedPubkeys>, AuthError> {
    let links = state.links.list_linked(&claims.account_id).await?;
    let linked_pubkeys = links
        .into_iter()
        .map(|l| LinkedPubkey {
            display_pubkey: l.display_pubkey(),
            linked_at: l.linked_at.to_rfc3339(),
            last_used_at: Some(l.last_used_at.to_rfc3339()),
            pubkey: l.pubkey,
        })
        .collect();
    Ok(Json(LinkedPubkeys {
        success: true,
        account_id: claims.account_id,
        linked_pubkeys,
    }))
}

async fn check_pubkey_link(
    State(state): State<AppState>,
    SignedPubkey(identity): SignedPubkey,
) -> Result<Json<LinkStatus>, AuthError> {
    let pubkey = identity.pubkey.unwrap_or_default();
    let link = state
        .authenticator
        .directory()
        .find_active_link(&pubkey)
        .await?;
    Ok(Json(LinkStatus {
        success: true,
        is_linked: link.is_some(),
        account_id: link.map(|l| l.account_id),
        pubkey,
    }))
}

async fn protected_me(NostrAuth(identity): NostrAuth) -> Json<RequestIdentity> {
    Json(identity)
}

async fn protected_account(DualAuth(identity): DualAuth) -> Json<RequestIdentity> {
    Json(identity)
}
