//! Linking, unlinking and transferring pubkey ownership.
//!
//! Per pubkey the states are: unlinked (no record) → active(account) →
//! inactive → active(same or another account). An active link can only be
//! released by its owner; an inactive one can be claimed by anyone.
//!
//! Every operation runs as one store transaction split in two phases: read
//! every record it touches, decide in memory ([`plan_link`] /
//! [`plan_unlink`]), then commit all writes at once.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    directory::IdentityDirectory,
    model::{Account, IdentityLink},
    store::{bounded, RecordStore, StoreError, Write},
    verify::parse_pubkey,
};

/// Link state rule violations and store failures.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid pubkey")]
    InvalidPubkey,
    #[error("invalid account id")]
    InvalidAccount,
    #[error("pubkey is already linked to a different account")]
    LinkedElsewhere,
    #[error("pubkey not found")]
    NotFound,
    #[error("pubkey does not belong to this account")]
    NotOwner,
    #[error("pubkey is already unlinked")]
    AlreadyUnlinked,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Enforces ownership rules on top of the record store.
#[derive(Clone)]
pub struct IdentityLinkService {
    store: Arc<dyn RecordStore>,
    directory: IdentityDirectory,
    timeout: Duration,
}

impl IdentityLinkService {
    pub fn new(store: Arc<dyn RecordStore>, directory: IdentityDirectory, timeout: Duration) -> Self {
        Self {
            store,
            directory,
            timeout,
        }
    }

    /// Link `pubkey` to `account_id`, creating, re-activating or transferring
    /// the record as needed.
    pub async fn link(&self, pubkey: &str, account_id: &str) -> Result<IdentityLink, LinkError> {
        validate(pubkey, account_id)?;
        let link = bounded(self.timeout, async {
            let mut tx = self.store.begin().await?;
            let existing = tx.identity(pubkey).await?;
            let account = tx.account(account_id).await?;
            match plan_link(pubkey, account_id, existing, account, Utc::now()) {
                Ok((link, writes)) => {
                    tx.commit(writes).await?;
                    Ok(Ok(link))
                }
                Err(e) => Ok(Err(e)),
            }
        })
        .await??;
        tracing::info!(pubkey, account_id, "pubkey linked");
        Ok(link)
    }

    /// Deactivate `pubkey`, which must be actively owned by `account_id`.
    pub async fn unlink(&self, pubkey: &str, account_id: &str) -> Result<(), LinkError> {
        bounded(self.timeout, async {
            let mut tx = self.store.begin().await?;
            let existing = tx.identity(pubkey).await?;
            let owner = match &existing {
                Some(link) if link.account_id == account_id && link.active => {
                    tx.account(account_id).await?
                }
                _ => None,
            };
            match plan_unlink(pubkey, account_id, existing, owner, Utc::now()) {
                Ok(writes) => {
                    tx.commit(writes).await?;
                    Ok(Ok(()))
                }
                Err(e) => Ok(Err(e)),
            }
        })
        .await??;
        tracing::info!(pubkey, account_id, "pubkey unlinked");
        Ok(())
    }

    /// Active links for `account_id`, oldest first.
    pub async fn list_linked(&self, account_id: &str) -> Result<Vec<IdentityLink>, LinkError> {
        Ok(self.directory.list_active_links_for(account_id).await?)
    }
}

fn validate(pubkey: &str, account_id: &str) -> Result<(), LinkError> {
    if pubkey.bytes().any(|b| b.is_ascii_uppercase()) || parse_pubkey(pubkey).is_err() {
        return Err(LinkError::InvalidPubkey);
    }
    if account_id.trim().is_empty() {
        return Err(LinkError::InvalidAccount);
    }
    Ok(())
}

/// Decide the writes for linking `pubkey` to `account_id` given the current
/// records.
pub fn plan_link(
    pubkey: &str,
    account_id: &str,
    existing: Option<IdentityLink>,
    account: Option<Account>,
    now: DateTime<Utc>,
) -> Result<(IdentityLink, Vec<Write>), LinkError> {
    let created_at = match &existing {
        Some(link) if link.active && link.account_id != account_id => {
            return Err(LinkError::LinkedElsewhere);
        }
        Some(link) => link.created_at,
        None => now,
    };
    let link = IdentityLink {
        pubkey: pubkey.to_string(),
        account_id: account_id.to_string(),
        active: true,
        created_at,
        linked_at: now,
        last_used_at: now,
    };
    let mut account = account.unwrap_or_else(|| Account::new(account_id, now));
    account.add_pubkey(pubkey);
    account.updated_at = now;
    Ok((
        link.clone(),
        vec![Write::Identity(link), Write::Account(account)],
    ))
}

/// Decide the writes for unlinking `pubkey` from `account_id`.
///
/// `owner` is the record of `account_id`, read only when the unlink is
/// allowed to proceed.
pub fn plan_unlink(
    pubkey: &str,
    account_id: &str,
    existing: Option<IdentityLink>,
    owner: Option<Account>,
    now: DateTime<Utc>,
) -> Result<Vec<Write>, LinkError> {
    let mut link = existing.ok_or(LinkError::NotFound)?;
    if link.account_id != account_id {
        return Err(LinkError::NotOwner);
    }
    if !link.active {
        return Err(LinkError::AlreadyUnlinked);
    }
    link.active = false;
    let mut account = owner.unwrap_or_else(|| Account::new(account_id, now));
    account.remove_pubkey(pubkey);
    account.updated_at = now;
    Ok(vec![Write::Identity(link), Write::Account(account)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::{FileStore, IdentityFilter, MemoryStore},
        touch::TouchQueue,
    };
    use secp256k1::{Keypair, Secp256k1};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn pubkey(seed: u8) -> String {
        let secp = Secp256k1::new();
        let kp = Keypair::from_seckey_slice(&secp, &[seed; 32]).unwrap();
        hex::encode(kp.x_only_public_key().0.serialize())
    }

    fn service_on(store: Arc<dyn RecordStore>) -> IdentityLinkService {
        let (queue, _rx) = TouchQueue::channel(1);
        let timeout = Duration::from_secs(5);
        let directory = IdentityDirectory::new(store.clone(), timeout, queue);
        IdentityLinkService::new(store, directory, timeout)
    }

    fn service() -> (Arc<dyn RecordStore>, IdentityLinkService) {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        (store.clone(), service_on(store))
    }

    /// Every account's pubkey set equals its active links, and vice versa.
    async fn assert_consistent(store: &Arc<dyn RecordStore>, accounts: &[&str]) {
        for acct in accounts {
            let links = store
                .query_identities(&IdentityFilter::account(acct).active(true), None, None)
                .await
                .unwrap();
            let from_links: BTreeSet<String> = links.into_iter().map(|l| l.pubkey).collect();
            let from_account: BTreeSet<String> = store
                .account(acct)
                .await
                .unwrap()
                .map(|a| a.active_pubkeys.into_iter().collect())
                .unwrap_or_default();
            assert_eq!(from_links, from_account, "account {acct}");
        }
    }

    #[tokio::test]
    async fn first_link_creates_record_and_account() {
        let (store, svc) = service();
        let p = pubkey(1);
        let link = svc.link(&p, "alice").await.unwrap();
        assert!(link.active);
        assert_eq!(link.account_id, "alice");
        let acct = store.account("alice").await.unwrap().unwrap();
        assert_eq!(acct.active_pubkeys, vec![p]);
        assert_consistent(&store, &["alice"]).await;
    }

    #[tokio::test]
    async fn relink_by_same_owner_is_idempotent() {
        let (store, svc) = service();
        let p = pubkey(1);
        let first = svc.link(&p, "alice").await.unwrap();
        let second = svc.link(&p, "alice").await.unwrap();
        assert_eq!(first.created_at, second.created_at);
        let acct = store.account("alice").await.unwrap().unwrap();
        assert_eq!(acct.active_pubkeys, vec![p.clone()]);
        let all = store
            .query_identities(&IdentityFilter::pubkey(&p), None, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn active_link_cannot_be_taken() {
        let (store, svc) = service();
        let p = pubkey(1);
        svc.link(&p, "alice").await.unwrap();
        assert!(matches!(
            svc.link(&p, "bob").await,
            Err(LinkError::LinkedElsewhere)
        ));
        let link = store.identity(&p).await.unwrap().unwrap();
        assert!(link.active);
        assert_eq!(link.account_id, "alice");
        assert!(store.account("bob").await.unwrap().is_none());
        assert_consistent(&store, &["alice", "bob"]).await;
    }

    #[tokio::test]
    async fn unlinked_pubkey_transfers_to_new_account() {
        let (store, svc) = service();
        let p = pubkey(1);
        let first = svc.link(&p, "alice").await.unwrap();
        svc.unlink(&p, "alice").await.unwrap();
        let moved = svc.link(&p, "bob").await.unwrap();
        assert_eq!(moved.account_id, "bob");
        assert!(moved.active);
        assert_eq!(moved.created_at, first.created_at);
        assert!(store.account("alice").await.unwrap().unwrap().active_pubkeys.is_empty());
        assert_consistent(&store, &["alice", "bob"]).await;
    }

    #[tokio::test]
    async fn unlink_rules() {
        let (store, svc) = service();
        let p = pubkey(1);
        assert!(matches!(svc.unlink(&p, "alice").await, Err(LinkError::NotFound)));
        svc.link(&p, "alice").await.unwrap();
        assert!(matches!(svc.unlink(&p, "bob").await, Err(LinkError::NotOwner)));
        svc.unlink(&p, "alice").await.unwrap();
        assert!(matches!(
            svc.unlink(&p, "alice").await,
            Err(LinkError::AlreadyUnlinked)
        ));
        // Inactive record stays put, owned by its last account.
        let link = store.identity(&p).await.unwrap().unwrap();
        assert!(!link.active);
        assert_eq!(link.account_id, "alice");
        assert_consistent(&store, &["alice", "bob"]).await;
    }

    #[tokio::test]
    async fn list_linked_is_active_only_in_link_order() {
        let (_store, svc) = service();
        let (p1, p2, p3) = (pubkey(1), pubkey(2), pubkey(3));
        svc.link(&p2, "alice").await.unwrap();
        svc.link(&p1, "alice").await.unwrap();
        svc.link(&p3, "alice").await.unwrap();
        svc.unlink(&p1, "alice").await.unwrap();
        let keys: Vec<_> = svc
            .list_linked("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.pubkey)
            .collect();
        assert_eq!(keys, vec![p2, p3]);
    }

    #[tokio::test]
    async fn malformed_inputs_are_rejected_before_the_store() {
        let (store, svc) = service();
        assert!(matches!(svc.link("zz", "alice").await, Err(LinkError::InvalidPubkey)));
        let upper = pubkey(1).to_uppercase();
        assert!(matches!(svc.link(&upper, "alice").await, Err(LinkError::InvalidPubkey)));
        assert!(matches!(
            svc.link(&pubkey(1), "  ").await,
            Err(LinkError::InvalidAccount)
        ));
        assert!(store.account("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_claims_leave_one_owner() {
        let (store, svc) = service();
        let p = pubkey(9);
        let claims = ["alice", "bob", "carol", "dave"].map(|acct| {
            let svc = svc.clone();
            let p = p.clone();
            tokio::spawn(async move { svc.link(&p, acct).await.is_ok() })
        });
        let mut winners = 0;
        for c in claims {
            if c.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_consistent(&store, &["alice", "bob", "carol", "dave"]).await;
    }

    #[tokio::test]
    async fn concurrent_claims_across_file_stores_leave_one_owner() {
        let dir = TempDir::new().unwrap();
        FileStore::new(dir.path().to_path_buf()).init().unwrap();
        let p = pubkey(8);
        let claims = ["alice", "bob"].map(|acct| {
            let store: Arc<dyn RecordStore> = Arc::new(FileStore::new(dir.path().to_path_buf()));
            let svc = service_on(store);
            let p = p.clone();
            tokio::spawn(async move { svc.link(&p, acct).await })
        });
        let mut winners = 0;
        let mut refused = 0;
        for c in claims {
            match c.await.unwrap() {
                Ok(_) => winners += 1,
                Err(LinkError::LinkedElsewhere) => refused += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!((winners, refused), (1, 1));

        let store: Arc<dyn RecordStore> = Arc::new(FileStore::new(dir.path().to_path_buf()));
        let owner = store.identity(&p).await.unwrap().unwrap();
        assert!(owner.active);
        let loser = if owner.account_id == "alice" { "bob" } else { "alice" };
        assert!(store
            .account(loser)
            .await
            .unwrap()
            .map_or(true, |a| a.active_pubkeys.is_empty()));
        assert_consistent(&store, &["alice", "bob"]).await;
    }

    #[tokio::test]
    async fn long_account_ids_link_on_file_store() {
        let dir = TempDir::new().unwrap();
        let file = FileStore::new(dir.path().to_path_buf());
        file.init().unwrap();
        let store: Arc<dyn RecordStore> = Arc::new(file);
        let svc = service_on(store.clone());
        let account = "a".repeat(128);
        let p = pubkey(5);
        svc.link(&p, &account).await.unwrap();
        let acct = store.account(&account).await.unwrap().unwrap();
        assert_eq!(acct.account_id, account);
        assert_eq!(acct.active_pubkeys, vec![p.clone()]);
        let listed = svc.list_linked(&account).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].pubkey, p);
        svc.unlink(&p, &account).await.unwrap();
        assert!(svc.list_linked(&account).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn state_machine_holds_on_file_store() {
        let dir = TempDir::new().unwrap();
        let file = FileStore::new(dir.path().to_path_buf());
        file.init().unwrap();
        let store: Arc<dyn RecordStore> = Arc::new(file);
        let svc = service_on(store.clone());
        let p = pubkey(4);
        svc.link(&p, "alice").await.unwrap();
        assert!(svc.link(&p, "bob").await.is_err());
        svc.unlink(&p, "alice").await.unwrap();
        svc.link(&p, "bob").await.unwrap();
        assert_consistent(&store, &["alice", "bob"]).await;
        let listed = svc.list_linked("bob").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(svc.list_linked("alice").await.unwrap().is_empty());
    }

    #[test]
    fn plan_link_never_steals_active_links() {
        let now = Utc::now();
        let existing = IdentityLink {
            pubkey: "p".into(),
            account_id: "a".into(),
            active: true,
            created_at: now,
            linked_at: now,
            last_used_at: now,
        };
        assert!(matches!(
            plan_link("p", "b", Some(existing.clone()), None, now),
            Err(LinkError::LinkedElsewhere)
        ));
        let (_, writes) = plan_link("p", "a", Some(existing), None, now).unwrap();
        assert_eq!(writes.len(), 2);
    }

    #[test]
    fn plan_unlink_checks_owner_before_state() {
        let now = Utc::now();
        let inactive = IdentityLink {
            pubkey: "p".into(),
            account_id: "a".into(),
            active: false,
            created_at: now,
            linked_at: now,
            last_used_at: now,
        };
        assert!(matches!(
            plan_unlink("p", "b", Some(inactive.clone()), None, now),
            Err(LinkError::NotOwner)
        ));
        assert!(matches!(
            plan_unlink("p", "a", Some(inactive), None, now),
            Err(LinkError::AlreadyUnlinked)
        ));
    }
}
