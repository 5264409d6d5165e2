//! Background worker recording when a pubkey last authenticated.
//!
//! Requests hand a [`TouchCommand`] to a bounded queue and move on; a single
//! worker task applies the updates. A full queue drops the update with a
//! warning rather than blocking the request.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};

use crate::store::{bounded, RecordStore, StoreError, Write};

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 256;

/// Commands processed by the last-used worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TouchCommand {
    /// Record a successful authentication by `pubkey` at `at`.
    Touch { pubkey: String, at: DateTime<Utc> },
}

/// Sending half of the last-used queue.
#[derive(Debug, Clone)]
pub struct TouchQueue {
    tx: mpsc::Sender<TouchCommand>,
}

impl TouchQueue {
    /// Queue without a worker, for callers that want to observe commands.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TouchCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue an update without waiting; drops it if the queue is full.
    pub fn submit(&self, pubkey: &str, at: DateTime<Utc>) {
        let cmd = TouchCommand::Touch {
            pubkey: pubkey.to_string(),
            at,
        };
        match self.tx.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(pubkey, "last-used queue full, dropping update");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(pubkey, "last-used worker stopped, dropping update");
            }
        }
    }
}

/// Start the worker. It exits once every [`TouchQueue`] clone is dropped and
/// the remaining commands are drained.
pub fn spawn(
    store: Arc<dyn RecordStore>,
    capacity: usize,
    timeout: Duration,
) -> (TouchQueue, JoinHandle<()>) {
    let (queue, mut rx) = TouchQueue::channel(capacity);
    let handle = tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            let TouchCommand::Touch { pubkey, at } = cmd;
            if let Err(e) = bounded(timeout, touch(store.as_ref(), &pubkey, at)).await {
                tracing::warn!(pubkey = %pubkey, error = %e, "failed to update last_used_at");
            }
        }
    });
    (queue, handle)
}

/// Set `last_used_at` on an existing record, never moving it backwards.
async fn touch(store: &dyn RecordStore, pubkey: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
    let mut tx = store.begin().await?;
    let Some(mut link) = tx.identity(pubkey).await? else {
        return Ok(());
    };
    if link.last_used_at >= at {
        return Ok(());
    }
    link.last_used_at = at;
    tx.commit(vec![Write::Identity(link)]).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::IdentityLink, store::MemoryStore};
    use chrono::Duration as ChronoDuration;

    fn link(pubkey: &str, at: DateTime<Utc>) -> IdentityLink {
        IdentityLink {
            pubkey: pubkey.into(),
            account_id: "acct".into(),
            active: true,
            created_at: at,
            linked_at: at,
            last_used_at: at,
        }
    }

    #[tokio::test]
    async fn worker_updates_and_drains_on_close() {
        let store = MemoryStore::new();
        let old = Utc::now() - ChronoDuration::hours(1);
        let tx = store.begin().await.unwrap();
        tx.commit(vec![Write::Identity(link("p1", old))]).await.unwrap();

        let (queue, handle) = spawn(Arc::new(store.clone()), 8, Duration::from_secs(1));
        let now = Utc::now();
        queue.submit("p1", now);
        queue.submit("unknown", now);
        drop(queue);
        handle.await.unwrap();

        let updated = store.identity("p1").await.unwrap().unwrap();
        assert_eq!(updated.last_used_at, now);
        assert!(store.identity("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn last_used_never_moves_backwards() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let tx = store.begin().await.unwrap();
        tx.commit(vec![Write::Identity(link("p1", now))]).await.unwrap();
        touch(&store, "p1", now - ChronoDuration::minutes(5)).await.unwrap();
        assert_eq!(store.identity("p1").await.unwrap().unwrap().last_used_at, now);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let (queue, mut rx) = TouchQueue::channel(1);
        let now = Utc::now();
        queue.submit("p1", now);
        queue.submit("p2", now);
        assert_eq!(
            rx.recv().await,
            Some(TouchCommand::Touch {
                pubkey: "p1".into(),
                at: now
            })
        );
        drop(queue);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn submit_after_worker_exit_is_harmless() {
        let (queue, rx) = TouchQueue::channel(4);
        drop(rx);
        queue.submit("p1", Utc::now());
    }
}
