//! Offline queue backed by the state store.
//!
//! The in-memory queue is authoritative. After every mutation a snapshot is
//! written under [`QUEUE_STATE_KEY`]; a failed write is logged and retried
//! implicitly by the next mutation.

use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{QueueEntry, QueueSnapshot, QueueStats};
use crate::services::offline_queue::{AppendOutcome, OfflineQueue};
use crate::services::store::{StateStore, QUEUE_STATE_KEY};

pub struct DurableQueue {
    queue: Mutex<OfflineQueue>,
    store: Arc<dyn StateStore>,
}

impl DurableQueue {
    /// Opens the queue, restoring any persisted snapshot.
    ///
    /// An unreadable snapshot is logged and the queue starts empty.
    pub async fn open(store: Arc<dyn StateStore>, capacity: usize) -> Self {
        let queue = match Self::load_snapshot(store.as_ref()).await {
            Ok(Some(snapshot)) => {
                let queue = OfflineQueue::from_snapshot(snapshot, capacity);
                tracing::info!(
                    entries = queue.len(),
                    pending = queue.pending_count(),
                    "Restored offline queue"
                );
                queue
            }
            Ok(None) => OfflineQueue::new(capacity),
            Err(e) => {
                tracing::error!(error = %e, "Failed to restore offline queue, starting empty");
                OfflineQueue::new(capacity)
            }
        };

        Self {
            queue: Mutex::new(queue),
            store,
        }
    }

    async fn load_snapshot(store: &dyn StateStore) -> Result<Option<QueueSnapshot>, StoreError> {
        match store.load(QUEUE_STATE_KEY).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Decode(e.to_string())),
            None => Ok(None),
        }
    }

    pub async fn append(&self, entry: QueueEntry) -> AppendOutcome {
        let mut queue = self.queue.lock().await;
        let outcome = queue.append(entry);
        self.persist(&queue).await;
        outcome
    }

    pub async fn pending(&self) -> Vec<QueueEntry> {
        self.queue.lock().await.pending()
    }

    pub async fn mark_synced(&self, ids: &[Uuid]) -> usize {
        let mut queue = self.queue.lock().await;
        let marked = queue.mark_synced(ids);
        if marked > 0 {
            self.persist(&queue).await;
        }
        marked
    }

    pub async fn purge_synced(&self) -> usize {
        let mut queue = self.queue.lock().await;
        let purged = queue.purge_synced();
        if purged > 0 {
            self.persist(&queue).await;
        }
        purged
    }

    pub async fn stats(&self) -> QueueStats {
        self.queue.lock().await.stats()
    }

    async fn persist(&self, queue: &OfflineQueue) {
        let encoded = match serde_json::to_string(&queue.snapshot()) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode offline queue");
                return;
            }
        };
        if let Err(e) = self.store.save(QUEUE_STATE_KEY, &encoded).await {
            tracing::error!(
                error = %e,
                entries = queue.len(),
                "Failed to persist offline queue, keeping it in memory"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LocationRecord, QueuePayload, TrackingType};
    use crate::services::store::MemoryStateStore;
    use chrono::Utc;

    fn entry() -> QueueEntry {
        QueueEntry::new(QueuePayload::Location(LocationRecord {
            latitude: 1.0,
            longitude: 2.0,
            accuracy: 3.0,
            altitude: None,
            speed: None,
            heading: None,
            timestamp: Utc::now(),
            tracking_type: TrackingType::Background,
        }))
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let store = Arc::new(MemoryStateStore::new());
        let queue = DurableQueue::open(store.clone(), 10).await;
        let first = queue.append(entry()).await.id;
        queue.append(entry()).await;
        queue.mark_synced(&[first]).await;

        let reopened = DurableQueue::open(store, 10).await;
        let stats = reopened.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.synced, 1);
        assert_eq!(reopened.pending().await.len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_memory_queue() {
        let store = Arc::new(MemoryStateStore::new());
        let queue = DurableQueue::open(store.clone(), 10).await;
        store.set_failing(true);
        queue.append(entry()).await;
        assert_eq!(queue.pending().await.len(), 1);

        store.set_failing(false);
        queue.append(entry()).await;
        let reopened = DurableQueue::open(store, 10).await;
        assert_eq!(reopened.pending().await.len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_starts_empty() {
        let store = Arc::new(MemoryStateStore::new());
        store.save(QUEUE_STATE_KEY, "not json").await.unwrap();
        let queue = DurableQueue::open(store, 10).await;
        assert_eq!(queue.stats().await.total, 0);
    }
}
