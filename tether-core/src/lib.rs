//! # tether-core
//!
//! Provider abstractions for the tether messaging client.
//!
//! The client never touches the runtime, the clock, the random number
//! generator or the disk directly. It goes through the provider traits
//! defined here so the same code runs against Tokio in production and against
//! a paused clock and in-memory storage in tests:
//!
//! - [`TimeProvider`]: Sleep, timeout, monotonic and wall-clock time
//! - [`TaskProvider`]: Task spawning for single-threaded environments
//! - [`RandomProvider`]: Jitter for reconnect backoff
//! - [`KeyValueStore`]: Durable storage under well-known keys
//!
//! The first three are bundled behind [`Providers`] so downstream types carry
//! a single type parameter.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod providers;
mod random;
mod storage;
mod task;
mod time;

pub use providers::{Providers, TokioProviders};
pub use random::{RandomProvider, TokioRandomProvider};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use task::{TaskProvider, TokioTaskProvider};
pub use time::{TimeError, TimeProvider, TokioTimeProvider};
