//! Request authentication pipeline: decode, verify, bind, resolve.

use chrono::Utc;

use crate::{
    binding::{bind, RequestTarget},
    context::{AuthContextBuilder, AuthMethod, RequestIdentity},
    directory::IdentityDirectory,
    error::AuthError,
    event::AuthEvent,
    header::{decode_event, HeaderError},
    verify::verify_event,
};

/// Authenticates requests carrying a signed event.
#[derive(Clone)]
pub struct NostrAuthenticator {
    directory: IdentityDirectory,
}

impl NostrAuthenticator {
    pub fn new(directory: IdentityDirectory) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &IdentityDirectory {
        &self.directory
    }

    /// Verify the event in `header` and bind it to `target`, without any
    /// directory lookup. Returns the verified event.
    pub fn signed_event(
        &self,
        header: Option<&str>,
        target: &RequestTarget,
        now: i64,
    ) -> Result<AuthEvent, AuthError> {
        let ev = decode_event(header.ok_or(HeaderError::Missing)?)?;
        verify_event(&ev)?;
        bind(&ev, target, now)?;
        Ok(ev)
    }

    /// Full authentication: the signer must hold an active link.
    pub async fn authenticate(
        &self,
        header: Option<&str>,
        target: &RequestTarget,
        now: i64,
    ) -> Result<RequestIdentity, AuthError> {
        let ev = self.signed_event(header, target, now)?;
        let Some(link) = self.directory.find_active_link(&ev.pubkey).await? else {
            return Err(match self.directory.find_link(&ev.pubkey).await? {
                Some(_) => AuthError::LinkInactive,
                None => AuthError::NotLinked,
            });
        };
        self.directory.touch_last_used(&ev.pubkey);
        Ok(AuthContextBuilder::new(AuthMethod::Nostr)
            .pubkey(ev.pubkey)
            .linked_account(link.account_id)
            .build())
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}
