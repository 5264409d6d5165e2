//! Request-level errors and their HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::{
    binding::BindError, header::HeaderError, link::LinkError, store::StoreError,
    token::TokenError, verify::VerifyError,
};

/// Every way a request can fail authentication or a link operation.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error("invalid event: {0}")]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("pubkey not linked")]
    NotLinked,
    #[error("link inactive")]
    LinkInactive,
    #[error("linked account does not match authenticated account")]
    AccountMismatch,
    #[error("request pubkey does not match authenticated pubkey")]
    PubkeyMismatch,
    #[error("invalid request body: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Header(HeaderError::Missing) => StatusCode::UNAUTHORIZED,
            AuthError::Header(_) => StatusCode::BAD_REQUEST,
            AuthError::Verify(_) | AuthError::Bind(_) | AuthError::Token(_) => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::NotLinked | AuthError::LinkInactive | AuthError::AccountMismatch => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::PubkeyMismatch | AuthError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::Link(LinkError::Store(_)) | AuthError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AuthError::Link(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Log the real error but return a generic message.
            tracing::error!(error = %self, "store failure");
            "internal error, please retry".to_string()
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
