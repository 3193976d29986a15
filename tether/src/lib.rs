//! # Tether
//!
//! Reliable messaging client for a long-lived bidirectional link to a
//! companion backend.
//!
//! This crate provides:
//! - **Connection supervisor**: Reconnection with exponential backoff,
//!   jitter and a fixed-interval fallback, plus heartbeats
//! - **Offline queue**: Bounded, priority-ordered, deduplicating and
//!   persisted store of messages that could not be sent
//! - **Reorder buffer**: In-order delivery of sequenced state updates
//! - **Correlation table**: Request/response matching with timeouts
//! - **Dispatcher**: Typed routing of inbound frames
//! - **Client**: Explicitly constructed facade tying it all together

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export provider types for convenience
pub use tether_core::{
    FileStore, KeyValueStore, MemoryStore, Providers, RandomProvider, TaskProvider, TimeError,
    TimeProvider, TokioProviders, TokioRandomProvider, TokioTaskProvider, TokioTimeProvider,
};

// =============================================================================
// Modules
// =============================================================================

/// Client facade.
pub mod client;

/// Client configuration.
pub mod config;

/// Request/response correlation.
pub mod correlation;

/// Inbound frame routing.
pub mod dispatcher;

/// Wire envelope and message kinds.
pub mod envelope;

/// Error types.
pub mod error;

/// Client event publish/subscribe.
pub mod events;

/// Client metrics.
pub mod metrics;

/// Persisted offline queue.
pub mod offline;

/// Reorder buffer for sequenced updates.
pub mod reorder;

/// State update consumers.
pub mod state;

/// Connection lifecycle management.
pub mod supervisor;

/// Transport adapters.
pub mod transport;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use client::{Client, Delivery};
pub use config::ClientConfig;
pub use correlation::{CorrelationTable, RequestIdFactory, RequestResult, ResponseFuture};
pub use dispatcher::{Dispatcher, Routed};
pub use envelope::{Envelope, EventKind, Inbound, OutboundMessage};
pub use error::{ClientError, ClientResult, ConfigError, FrameError, RequestError, TransportError};
pub use events::{ClientEvent, DrainSummary, DropReason, EventBus, Subscription};
pub use metrics::ClientMetrics;
pub use offline::{EnqueueOutcome, OfflineQueue, PersistentQueue, Priority, QueueEntry};
pub use reorder::{Offer, ReorderBuffer};
pub use state::{SnapshotConsumer, StateConsumer};
pub use supervisor::{ConnectionState, ReconnectPolicy, ScheduledRetry};
pub use transport::{
    FrameSink, FrameStream, MemoryLink, MemoryServer, MemoryTransport, Transport,
    WebSocketTransport,
};
