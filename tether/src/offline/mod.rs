//! Offline queue: bounded, priority-ordered, deduplicating store of outbound
//! messages that could not be sent, persisted across restarts.
//!
//! - [`OfflineQueue`] is the in-memory ordering and capacity logic.
//! - [`PersistentQueue`] wraps it with durable storage and write-back after
//!   every mutation.
//! - [`Priority`] and [`dedup_key`] derive an entry's rank and identity from
//!   the message itself.

mod persistent;
mod priority;
mod queue;

pub use persistent::PersistentQueue;
pub use priority::{dedup_key, Priority};
pub use queue::{EnqueueOutcome, OfflineQueue, QueueEntry};
