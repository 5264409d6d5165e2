//! In-process store used for development and tests.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{IdentityFilter, Order, RecordStore, StoreError, Transaction, Write};
use crate::model::{Account, IdentityLink};

#[derive(Default)]
struct Tables {
    identities: BTreeMap<String, IdentityLink>,
    accounts: BTreeMap<String, Account>,
}

/// Map-backed store; a transaction holds the table lock until it ends.
#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    ordered: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            ordered: true,
        }
    }

    /// A store whose ordered queries fail as if the sort index were missing.
    pub fn without_index() -> Self {
        Self {
            ordered: false,
            ..Self::new()
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn query_identities(
        &self,
        filter: &IdentityFilter,
        order: Option<Order>,
        limit: Option<usize>,
    ) -> Result<Vec<IdentityLink>, StoreError> {
        if order.is_some() && !self.ordered {
            return Err(StoreError::MissingIndex("identities by linked_at"));
        }
        let tables = self.tables.lock().await;
        let mut out: Vec<IdentityLink> = tables
            .identities
            .values()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect();
        if let Some(Order::LinkedAtAsc) = order {
            out.sort_by_key(|l| l.linked_at);
        }
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn identity(&self, pubkey: &str) -> Result<Option<IdentityLink>, StoreError> {
        Ok(self.tables.lock().await.identities.get(pubkey).cloned())
    }

    async fn account(&self, account_id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.tables.lock().await.accounts.get(account_id).cloned())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        Ok(Box::new(MemoryTransaction { guard }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn identity(&mut self, pubkey: &str) -> Result<Option<IdentityLink>, StoreError> {
        Ok(self.guard.identities.get(pubkey).cloned())
    }

    async fn account(&mut self, account_id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.guard.accounts.get(account_id).cloned())
    }

    async fn commit(self: Box<Self>, writes: Vec<Write>) -> Result<(), StoreError> {
        let mut guard = self.guard;
        for w in writes {
            match w {
                Write::Identity(link) => {
                    guard.identities.insert(link.pubkey.clone(), link);
                }
                Write::Account(acct) => {
                    guard.accounts.insert(acct.account_id.clone(), acct);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn link(pubkey: &str, account: &str, active: bool, age_secs: i64) -> IdentityLink {
        let at = Utc::now() - Duration::seconds(age_secs);
        IdentityLink {
            pubkey: pubkey.into(),
            account_id: account.into(),
            active,
            created_at: at,
            linked_at: at,
            last_used_at: at,
        }
    }

    async fn seed(store: &MemoryStore, links: Vec<IdentityLink>) {
        let tx = store.begin().await.unwrap();
        tx.commit(links.into_iter().map(Write::Identity).collect())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn commit_makes_writes_visible() {
        let store = MemoryStore::new();
        seed(&store, vec![link("p1", "a1", true, 0)]).await;
        let mut tx = store.begin().await.unwrap();
        assert!(tx.identity("p1").await.unwrap().is_some());
        assert!(tx.account("a1").await.unwrap().is_none());
        tx.commit(vec![Write::Account(Account::new("a1", Utc::now()))])
            .await
            .unwrap();
        assert!(store.account("a1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dropped_transaction_writes_nothing() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            assert!(tx.identity("p1").await.unwrap().is_none());
        }
        assert!(store.identity("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ordered_query_sorts_by_linked_at() {
        let store = MemoryStore::new();
        seed(
            &store,
            vec![
                link("p1", "a1", true, 10),
                link("p2", "a1", true, 30),
                link("p3", "a1", false, 40),
                link("p4", "a2", true, 50),
            ],
        )
        .await;
        let filter = IdentityFilter::account("a1").active(true);
        let res = store
            .query_identities(&filter, Some(Order::LinkedAtAsc), None)
            .await
            .unwrap();
        let keys: Vec<_> = res.iter().map(|l| l.pubkey.as_str()).collect();
        assert_eq!(keys, vec!["p2", "p1"]);
        let limited = store
            .query_identities(&filter, Some(Order::LinkedAtAsc), Some(1))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn unindexed_store_rejects_ordered_queries() {
        let store = MemoryStore::without_index();
        let filter = IdentityFilter::account("a1");
        assert!(matches!(
            store
                .query_identities(&filter, Some(Order::LinkedAtAsc), None)
                .await,
            Err(StoreError::MissingIndex(_))
        ));
        assert!(store.query_identities(&filter, None, None).await.is_ok());
    }
}
