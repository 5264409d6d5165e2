//! Typed per-request identity handed to handlers.

use serde::Serialize;

/// How the caller proved who they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Signed event only, no directory lookup.
    Signature,
    /// Signed event resolved to an active link.
    Nostr,
    /// Bearer token only.
    Token,
    /// Bearer token and signed event, checked against each other.
    Dual,
}

/// Resolved identity of the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestIdentity {
    pub method: AuthMethod,
    /// Pubkey proven by a signed event.
    pub pubkey: Option<String>,
    /// Account the pubkey is actively linked to.
    pub linked_account_id: Option<String>,
    /// Account proven by a bearer token.
    pub account_id: Option<String>,
}

/// Assembles a [`RequestIdentity`] from the proofs a request carried.
#[derive(Debug, Clone)]
pub struct AuthContextBuilder {
    method: AuthMethod,
    pubkey: Option<String>,
    linked_account_id: Option<String>,
    account_id: Option<String>,
}

impl AuthContextBuilder {
    pub fn new(method: AuthMethod) -> Self {
        Self {
            method,
            pubkey: None,
            linked_account_id: None,
            account_id: None,
        }
    }

    pub fn pubkey(mut self, pubkey: impl Into<String>) -> Self {
        self.pubkey = Some(pubkey.into());
        self
    }

    pub fn linked_account(mut self, account_id: impl Into<String>) -> Self {
        self.linked_account_id = Some(account_id.into());
        self
    }

    pub fn account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn build(self) -> RequestIdentity {
        RequestIdentity {
            method: self.method,
            pubkey: self.pubkey,
            linked_account_id: self.linked_account_id,
            account_id: self.account_id,
        }
    }
}
