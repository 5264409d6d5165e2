//! Durable record store abstraction.
//!
//! Stores expose point lookups, equality-filtered identity queries with an
//! optional `linked_at` ordering, and transactions. A [`Transaction`] hands
//! out reads until it is consumed by [`Transaction::commit`], so every write
//! phase follows a complete read phase.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Account, IdentityLink};

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Failures raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("index unavailable: {0}")]
    MissingIndex(&'static str),
    #[error("invalid record key: {0}")]
    InvalidKey(String),
    #[error("store busy: {0}")]
    Busy(String),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Equality filter over identity records; `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityFilter {
    pub pubkey: Option<String>,
    pub account_id: Option<String>,
    pub active: Option<bool>,
}

impl IdentityFilter {
    pub fn pubkey(pubkey: &str) -> Self {
        Self {
            pubkey: Some(pubkey.to_string()),
            ..Self::default()
        }
    }

    pub fn account(account_id: &str) -> Self {
        Self {
            account_id: Some(account_id.to_string()),
            ..Self::default()
        }
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    /// Whether `link` satisfies every set field.
    pub fn matches(&self, link: &IdentityLink) -> bool {
        self.pubkey.as_ref().map_or(true, |p| *p == link.pubkey)
            && self
                .account_id
                .as_ref()
                .map_or(true, |a| *a == link.account_id)
            && self.active.map_or(true, |a| a == link.active)
    }
}

/// Sort orders a store may support through a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    LinkedAtAsc,
}

/// A single mutation applied in a transaction's write phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Write {
    Identity(IdentityLink),
    Account(Account),
}

/// Shared durable store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Identity records matching `filter`, optionally ordered and limited.
    ///
    /// Ordered queries fail with [`StoreError::MissingIndex`] when the backing
    /// index is unavailable.
    async fn query_identities(
        &self,
        filter: &IdentityFilter,
        order: Option<Order>,
        limit: Option<usize>,
    ) -> Result<Vec<IdentityLink>, StoreError>;

    /// Point lookup of one identity record.
    async fn identity(&self, pubkey: &str) -> Result<Option<IdentityLink>, StoreError>;

    /// Point lookup of one account record.
    async fn account(&self, account_id: &str) -> Result<Option<Account>, StoreError>;

    /// Open a read-then-write transaction.
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;
}

/// Atomic unit of reads followed by one batch of writes.
///
/// Dropping a transaction without committing discards it.
#[async_trait]
pub trait Transaction: Send {
    async fn identity(&mut self, pubkey: &str) -> Result<Option<IdentityLink>, StoreError>;

    async fn account(&mut self, account_id: &str) -> Result<Option<Account>, StoreError>;

    /// Apply `writes` atomically: all become visible or none do.
    async fn commit(self: Box<Self>, writes: Vec<Write>) -> Result<(), StoreError>;
}

/// Run `fut`, failing with [`StoreError::Timeout`] once `limit` elapses.
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}
