//! Combining a bearer-token identity with a signed-event identity.

use crate::{
    context::{AuthContextBuilder, AuthMethod, RequestIdentity},
    directory::IdentityDirectory,
    error::AuthError,
    token::AccountClaims,
};

/// Checks that a token and a signed event describe one coherent caller.
#[derive(Clone)]
pub struct DualAuthCombinator {
    directory: IdentityDirectory,
}

impl DualAuthCombinator {
    pub fn new(directory: IdentityDirectory) -> Self {
        Self { directory }
    }

    /// Pair two proofs without consulting the directory, as needed to create
    /// a link in the first place. A pubkey declared by the client must equal
    /// the signer.
    pub fn proofs(
        claims: &AccountClaims,
        signer: &str,
        declared: Option<&str>,
    ) -> Result<RequestIdentity, AuthError> {
        check_declared(signer, declared)?;
        Ok(AuthContextBuilder::new(AuthMethod::Dual)
            .pubkey(signer)
            .account(&claims.account_id)
            .build())
    }

    /// Require `signer` to be actively linked to the token's account.
    pub async fn combine(
        &self,
        claims: &AccountClaims,
        signer: &str,
        declared: Option<&str>,
    ) -> Result<RequestIdentity, AuthError> {
        check_declared(signer, declared)?;
        let link = self
            .directory
            .find_active_link(signer)
            .await?
            .ok_or(AuthError::NotLinked)?;
        if link.account_id != claims.account_id {
            return Err(AuthError::AccountMismatch);
        }
        Ok(AuthContextBuilder::new(AuthMethod::Dual)
            .pubkey(signer)
            .linked_account(&link.account_id)
            .account(&claims.account_id)
            .build())
    }
}

fn check_declared(signer: &str, declared: Option<&str>) -> Result<(), AuthError> {
    match declared {
        Some(pk) if !pk.is_empty() && pk != signer => Err(AuthError::PubkeyMismatch),
        _ => Ok(()),
    }
}
