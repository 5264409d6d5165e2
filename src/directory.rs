//! Policy-free access to identity link records.

use std::{sync::Arc, time::Duration};

use chrono::Utc;

use crate::{
    model::IdentityLink,
    store::{bounded, IdentityFilter, Order, RecordStore, StoreError},
    touch::TouchQueue,
};

/// Read accessors over the record store plus the last-used queue.
#[derive(Clone)]
pub struct IdentityDirectory {
    store: Arc<dyn RecordStore>,
    timeout: Duration,
    touches: TouchQueue,
}

impl IdentityDirectory {
    pub fn new(store: Arc<dyn RecordStore>, timeout: Duration, touches: TouchQueue) -> Self {
        Self {
            store,
            timeout,
            touches,
        }
    }

    /// The active link for `pubkey`, if any.
    pub async fn find_active_link(&self, pubkey: &str) -> Result<Option<IdentityLink>, StoreError> {
        let filter = IdentityFilter::pubkey(pubkey).active(true);
        let mut found = bounded(
            self.timeout,
            self.store.query_identities(&filter, None, Some(1)),
        )
        .await?;
        Ok(found.pop())
    }

    /// The link record for `pubkey` whether active or not.
    pub async fn find_link(&self, pubkey: &str) -> Result<Option<IdentityLink>, StoreError> {
        bounded(self.timeout, self.store.identity(pubkey)).await
    }

    /// Active links owned by `account_id`, oldest link first.
    ///
    /// When the store cannot serve the ordered query the links are fetched
    /// unordered and sorted here instead.
    pub async fn list_active_links_for(
        &self,
        account_id: &str,
    ) -> Result<Vec<IdentityLink>, StoreError> {
        let filter = IdentityFilter::account(account_id).active(true);
        let ordered = bounded(
            self.timeout,
            self.store
                .query_identities(&filter, Some(Order::LinkedAtAsc), None),
        )
        .await;
        match ordered {
            Ok(links) => Ok(links),
            Err(e) => {
                tracing::warn!(account_id, error = %e, "ordered link query failed, scanning");
                let mut links = bounded(
                    self.timeout,
                    self.store
                        .query_identities(&IdentityFilter::account(account_id), None, None),
                )
                .await?;
                links.retain(|l| l.active);
                links.sort_by_key(|l| l.linked_at);
                Ok(links)
            }
        }
    }

    /// Record a use of `pubkey` in the background; never fails or blocks.
    pub fn touch_last_used(&self, pubkey: &str) {
        self.touches.submit(pubkey, Utc::now());
    }
}
