//! Offline queue backed by durable storage.

use std::cell::RefCell;
use std::io;
use std::time::Duration;

use tether_core::KeyValueStore;

use super::{EnqueueOutcome, OfflineQueue, QueueEntry};
use crate::envelope::OutboundMessage;

/// Offline queue that writes itself back to a [`KeyValueStore`] after every
/// mutation.
///
/// The queue is serialized as a JSON list of [`QueueEntry`] under one key.
/// Missing or corrupt data loads as an empty queue. Storage failures are
/// logged and never surface to the submitter; the in-memory queue stays
/// authoritative for the session.
pub struct PersistentQueue<S: KeyValueStore> {
    queue: RefCell<OfflineQueue>,
    store: S,
    key: String,
    max_age: Duration,
    /// Serializes snapshot+save so a later mutation is never overwritten by
    /// an earlier snapshot.
    write_lock: tokio::sync::Mutex<()>,
}

impl<S: KeyValueStore> PersistentQueue<S> {
    /// Load the queue stored under `key`, dropping entries older than
    /// `max_age`. If anything was dropped the pruned queue is written back
    /// immediately.
    pub async fn restore(
        store: S,
        key: impl Into<String>,
        capacity: usize,
        max_age: Duration,
        now_ms: u64,
    ) -> Self {
        let key = key.into();
        let entries = match store.load(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Vec<QueueEntry>>(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(
                        "PersistentQueue: stored queue under {} is corrupt ({}), starting empty",
                        key,
                        e
                    );
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(
                    "PersistentQueue: failed to load {} ({}), starting empty",
                    key,
                    e
                );
                Vec::new()
            }
        };

        let restored = entries.len();
        let mut queue = OfflineQueue::from_entries(entries, capacity);
        let expired = queue.remove_expired(now_ms, duration_ms(max_age));
        let dropped = restored - queue.len();

        let this = Self {
            queue: RefCell::new(queue),
            store,
            key,
            max_age,
            write_lock: tokio::sync::Mutex::new(()),
        };

        if !expired.is_empty() {
            tracing::info!(
                "PersistentQueue: discarded {} expired entries at load",
                expired.len()
            );
        }
        if dropped > 0 {
            this.persist_logged().await;
        }
        tracing::debug!(
            "PersistentQueue: restored {} entries from {}",
            this.len(),
            this.key
        );
        this
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Copy of the entries in drain order.
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.queue.borrow().entries().to_vec()
    }

    /// Storage key the queue is persisted under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Add a message and persist.
    pub async fn enqueue(&self, message: OutboundMessage, now_ms: u64) -> EnqueueOutcome {
        let outcome = self.queue.borrow_mut().enqueue(message, now_ms);
        self.persist_logged().await;
        outcome
    }

    /// Put back an entry that failed to send and persist.
    pub async fn requeue(&self, entry: QueueEntry) -> EnqueueOutcome {
        let outcome = self.queue.borrow_mut().requeue(entry);
        self.persist_logged().await;
        outcome
    }

    /// Put back entries unchanged with a single write, e.g. the unattempted
    /// remainder of an interrupted drain.
    pub async fn requeue_all(&self, entries: Vec<QueueEntry>) -> Vec<EnqueueOutcome> {
        if entries.is_empty() {
            return Vec::new();
        }
        let outcomes = {
            let mut queue = self.queue.borrow_mut();
            entries.into_iter().map(|e| queue.requeue(e)).collect()
        };
        self.persist_logged().await;
        outcomes
    }

    /// Take every entry for draining.
    ///
    /// Returns `(entries, expired)`: expired entries are removed first and
    /// handed back separately so the caller can report them.
    pub async fn take_for_drain(&self, now_ms: u64) -> (Vec<QueueEntry>, Vec<QueueEntry>) {
        let (entries, expired) = {
            let mut queue = self.queue.borrow_mut();
            let expired = queue.remove_expired(now_ms, duration_ms(self.max_age));
            (queue.take_all(), expired)
        };
        if !entries.is_empty() || !expired.is_empty() {
            self.persist_logged().await;
        }
        (entries, expired)
    }

    /// Empty the queue and delete its persisted copy.
    pub async fn clear(&self) -> io::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.queue.borrow_mut().clear();
        self.store.remove(&self.key).await
    }

    /// Write the current queue to storage.
    pub async fn persist(&self) -> io::Result<()> {
        let _guard = self.write_lock.lock().await;
        let bytes = {
            let queue = self.queue.borrow();
            serde_json::to_vec(queue.entries()).map_err(io::Error::other)?
        };
        self.store.save(&self.key, &bytes).await
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            tracing::warn!("PersistentQueue: failed to persist {}: {}", self.key, e);
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_core::MemoryStore;

    const DAY_MS: u64 = 24 * 60 * 60 * 1000;
    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    fn msg(kind: &str, id: u64) -> OutboundMessage {
        OutboundMessage::new(kind, json!({ "id": id }))
    }

    #[tokio::test]
    async fn test_every_mutation_is_persisted() {
        let store = MemoryStore::new();
        let queue = PersistentQueue::restore(store.clone(), "q", 10, WEEK, 0).await;

        queue.enqueue(msg("chat", 1), 1).await;
        queue.enqueue(msg("alert", 2), 2).await;

        let stored: Vec<QueueEntry> =
            serde_json::from_slice(&store.get("q").expect("persisted")).expect("json");
        assert_eq!(stored, queue.snapshot());
        assert_eq!(stored[0].message.kind, "alert");
    }

    #[tokio::test]
    async fn test_restore_survives_restart() {
        let store = MemoryStore::new();
        {
            let queue = PersistentQueue::restore(store.clone(), "q", 10, WEEK, 0).await;
            queue.enqueue(msg("chat", 1), 1).await;
            queue.enqueue(msg("state_update", 2), 2).await;
        }

        let queue = PersistentQueue::restore(store, "q", 10, WEEK, 10).await;
        assert_eq!(queue.len(), 2);
        let outcome = queue.enqueue(msg("chat", 1), 20).await;
        assert!(matches!(outcome, EnqueueOutcome::Refreshed { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_storage_loads_empty() {
        let store = MemoryStore::new();
        store.put("q", "{{{ definitely not a queue");

        let queue = PersistentQueue::restore(store.clone(), "q", 10, WEEK, 0).await;
        assert!(queue.is_empty());

        queue.enqueue(msg("chat", 1), 1).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_extreme_stored_counters_do_not_panic() {
        let store = MemoryStore::new();
        store.put(
            "q",
            r#"[{"id":18446744073709551615,"message":{"type":"chat","data":{"id":1}},
                "priority":"low","dedup_key":"chat:-:1","queued_at_ms":0,
                "retry_count":4294967295}]"#,
        );

        let queue = PersistentQueue::restore(store, "q", 10, WEEK, 0).await;
        assert_eq!(queue.snapshot()[0].id, 1);

        let outcome = queue.enqueue(msg("chat", 1), 1).await;
        assert_eq!(outcome, EnqueueOutcome::Refreshed { id: 1, retry_count: u32::MAX });
        let outcome = queue.enqueue(msg("chat", 2), 2).await;
        assert!(matches!(outcome, EnqueueOutcome::Inserted { id: 2, evicted: None }));
    }

    #[tokio::test]
    async fn test_expired_entries_dropped_at_load_and_written_back() {
        let store = MemoryStore::new();
        {
            let queue = PersistentQueue::restore(store.clone(), "q", 10, WEEK, 0).await;
            queue.enqueue(msg("chat", 1), 0).await;
            queue.enqueue(msg("chat", 2), 6 * DAY_MS).await;
        }

        let queue = PersistentQueue::restore(store.clone(), "q", 10, WEEK, 8 * DAY_MS).await;
        assert_eq!(queue.len(), 1);

        let stored: Vec<QueueEntry> =
            serde_json::from_slice(&store.get("q").expect("persisted")).expect("json");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].queued_at_ms, 6 * DAY_MS);
    }

    #[tokio::test]
    async fn test_take_for_drain_empties_and_reports_expired() {
        let store = MemoryStore::new();
        let queue = PersistentQueue::restore(store.clone(), "q", 10, WEEK, 0).await;
        queue.enqueue(msg("chat", 1), 0).await;
        queue.enqueue(msg("alert", 2), 7 * DAY_MS).await;

        let (entries, expired) = queue.take_for_drain(7 * DAY_MS + 1).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message.kind, "alert");
        assert_eq!(expired.len(), 1);
        assert!(queue.is_empty());
        assert_eq!(store.get("q").as_deref(), Some(&b"[]"[..]));
    }

    #[tokio::test]
    async fn test_clear_removes_persisted_copy() {
        let store = MemoryStore::new();
        let queue = PersistentQueue::restore(store.clone(), "q", 10, WEEK, 0).await;
        queue.enqueue(msg("chat", 1), 0).await;
        assert!(store.contains("q"));

        queue.clear().await.expect("clear");
        assert!(queue.is_empty());
        assert!(!store.contains("q"));
    }

    #[tokio::test]
    async fn test_requeue_all_restores_interrupted_drain() {
        let store = MemoryStore::new();
        let queue = PersistentQueue::restore(store.clone(), "q", 10, WEEK, 0).await;
        queue.enqueue(msg("chat", 1), 1).await;
        queue.enqueue(msg("alert", 2), 2).await;

        let (entries, _) = queue.take_for_drain(3).await;
        let outcomes = queue.requeue_all(entries.clone()).await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(queue.snapshot(), entries);

        let stored: Vec<QueueEntry> =
            serde_json::from_slice(&store.get("q").expect("persisted")).expect("json");
        assert_eq!(stored, entries);
    }
}
