//! In-memory offline queue.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};

use super::Priority;
use crate::envelope::OutboundMessage;

/// A message held by the offline queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Queue-assigned id, unique within one queue.
    pub id: u64,

    /// The queued message.
    pub message: OutboundMessage,

    /// Priority derived from the message kind at enqueue time.
    pub priority: Priority,

    /// Identity used for deduplication.
    pub dedup_key: String,

    /// Wall-clock enqueue time in milliseconds since the Unix epoch.
    pub queued_at_ms: u64,

    /// Failed send attempts plus duplicate submissions.
    pub retry_count: u32,
}

impl QueueEntry {
    /// Age of the entry at `now_ms`.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.queued_at_ms)
    }

    fn order_key(&self) -> (Reverse<Priority>, u64, u64) {
        (Reverse(self.priority), self.queued_at_ms, self.id)
    }
}

/// Result of adding a message to the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// A new entry was created. Going over capacity evicted `evicted`, which
    /// may be the new entry itself.
    Inserted {
        /// Id of the new entry.
        id: u64,
        /// Entry removed to stay within capacity.
        evicted: Option<QueueEntry>,
    },
    /// An entry with the same dedup key existed and was refreshed in place.
    Refreshed {
        /// Id of the existing entry.
        id: u64,
        /// Its retry count after the refresh.
        retry_count: u32,
    },
}

/// Bounded, priority-ordered, deduplicating message queue.
///
/// # Invariants
///
/// - Entries are ordered by descending priority, then ascending
///   `queued_at_ms`, then ascending id.
/// - At most one entry per dedup key.
/// - `len() <= capacity()` after every operation.
#[derive(Debug, Clone)]
pub struct OfflineQueue {
    entries: Vec<QueueEntry>,
    capacity: usize,
    next_id: u64,
}

impl OfflineQueue {
    /// Create an empty queue. A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
            next_id: 1,
        }
    }

    /// Rebuild a queue from persisted entries, restoring the invariants
    /// (order, one entry per key, capacity) whatever state the data is in.
    ///
    /// Stored ids are not trusted: entries are renumbered from 1 in their
    /// stored order.
    pub fn from_entries(entries: Vec<QueueEntry>, capacity: usize) -> Self {
        let mut queue = Self::new(capacity);
        for mut entry in entries {
            if queue.position_of(&entry.dedup_key).is_some() {
                tracing::debug!("OfflineQueue: dropping duplicate restored key {}", entry.dedup_key);
                continue;
            }
            entry.id = queue.next_id;
            queue.next_id = queue.next_id.saturating_add(1);
            queue.insert_sorted(entry);
            if let Some(evicted) = queue.evict_if_over_capacity() {
                tracing::debug!("OfflineQueue: restored entry {} over capacity", evicted.id);
            }
        }
        queue
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries in drain order.
    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    /// Add a message.
    ///
    /// A message whose dedup key is already queued refreshes that entry's
    /// timestamp and bumps its retry count instead of adding a second entry.
    pub fn enqueue(&mut self, message: OutboundMessage, now_ms: u64) -> EnqueueOutcome {
        let key = message.dedup_key();

        if let Some(index) = self.position_of(&key) {
            let mut entry = self.entries.remove(index);
            entry.queued_at_ms = now_ms;
            entry.retry_count = entry.retry_count.saturating_add(1);
            let (id, retry_count) = (entry.id, entry.retry_count);
            self.insert_sorted(entry);
            return EnqueueOutcome::Refreshed { id, retry_count };
        }

        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        let entry = QueueEntry {
            id,
            priority: message.priority(),
            dedup_key: key,
            message,
            queued_at_ms: now_ms,
            retry_count: 0,
        };
        self.insert_sorted(entry);
        let evicted = self.evict_if_over_capacity();
        EnqueueOutcome::Inserted { id, evicted }
    }

    /// Put back an entry that failed to send, keeping its id, timestamp and
    /// retry count.
    ///
    /// If a fresh submission with the same key arrived meanwhile, that entry
    /// is kept and inherits the higher retry count.
    pub fn requeue(&mut self, entry: QueueEntry) -> EnqueueOutcome {
        if let Some(index) = self.position_of(&entry.dedup_key) {
            let existing = &mut self.entries[index];
            existing.retry_count = existing.retry_count.max(entry.retry_count);
            return EnqueueOutcome::Refreshed {
                id: existing.id,
                retry_count: existing.retry_count,
            };
        }

        let id = entry.id;
        self.next_id = self.next_id.max(id.saturating_add(1));
        self.insert_sorted(entry);
        let evicted = self.evict_if_over_capacity();
        EnqueueOutcome::Inserted { id, evicted }
    }

    /// Remove and return every entry, in drain order.
    pub fn take_all(&mut self) -> Vec<QueueEntry> {
        std::mem::take(&mut self.entries)
    }

    /// Remove and return entries older than `max_age_ms`.
    pub fn remove_expired(&mut self, now_ms: u64, max_age_ms: u64) -> Vec<QueueEntry> {
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.age_ms(now_ms) > max_age_ms);
        self.entries = kept;
        expired
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn position_of(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.dedup_key == key)
    }

    fn insert_sorted(&mut self, entry: QueueEntry) {
        let key = entry.order_key();
        let index = self.entries.partition_point(|e| e.order_key() < key);
        self.entries.insert(index, entry);
    }

    /// Evict the lowest-priority, oldest entry when over capacity.
    fn evict_if_over_capacity(&mut self) -> Option<QueueEntry> {
        if self.entries.len() <= self.capacity {
            return None;
        }
        let lowest = self.entries.last()?.priority;
        // Lowest priority sorts last; its oldest member starts that run.
        let index = self.entries.partition_point(|e| e.priority > lowest);
        Some(self.entries.remove(index))
    }
}
