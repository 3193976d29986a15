//! Counters and connection state for a client.

use std::time::Duration;

/// Metrics and state information for a messaging client.
///
/// Every silent data-loss path (eviction, expiry, retry exhaustion, gap
/// skips, dropped frames) has a counter here so it stays observable.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientMetrics {
    /// Total number of connection attempts made
    pub connection_attempts: u64,

    /// Total number of successful connections established
    pub connections_established: u64,

    /// Total number of connection failures
    pub connection_failures: u64,

    /// Current consecutive failure count
    pub consecutive_failures: u32,

    /// Reconnect delay most recently scheduled
    pub current_reconnect_delay: Duration,

    /// Time of last successful connection (None if never connected)
    pub last_connected: Option<Duration>,

    /// Time of last connection failure (None if no failures)
    pub last_failure: Option<Duration>,

    /// Whether the link is currently up
    pub is_connected: bool,

    /// Frames written to the link (live sends and drained entries)
    pub messages_sent: u64,

    /// Frames read from the link
    pub messages_received: u64,

    /// Messages placed in the offline queue
    pub messages_queued: u64,

    /// Queue entries evicted by capacity pressure
    pub messages_evicted: u64,

    /// Queue entries discarded for exceeding their maximum age
    pub messages_expired: u64,

    /// Queue entries discarded after exhausting their send retries
    pub retries_exhausted: u64,

    /// State updates discarded as already applied
    pub stale_updates: u64,

    /// Sequence numbers declared lost by reorder overflow
    pub sequences_skipped: u64,

    /// Inbound frames that could not be decoded
    pub malformed_frames: u64,

    /// Inbound frames of an unrecognized type
    pub unknown_frames: u64,

    /// Keep-alive frames written
    pub heartbeats_sent: u64,

    /// Keep-alive acknowledgements received
    pub heartbeat_acks: u64,

    /// Requests answered by the backend
    pub requests_completed: u64,

    /// Requests failed by their timeout or the sweep
    pub requests_timed_out: u64,

    /// Requests failed by teardown or shutdown
    pub requests_failed: u64,
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientMetrics {
    /// Create a zeroed metrics instance.
    pub fn new() -> Self {
        Self {
            connection_attempts: 0,
            connections_established: 0,
            connection_failures: 0,
            consecutive_failures: 0,
            current_reconnect_delay: Duration::ZERO,
            last_connected: None,
            last_failure: None,
            is_connected: false,
            messages_sent: 0,
            messages_received: 0,
            messages_queued: 0,
            messages_evicted: 0,
            messages_expired: 0,
            retries_exhausted: 0,
            stale_updates: 0,
            sequences_skipped: 0,
            malformed_frames: 0,
            unknown_frames: 0,
            heartbeats_sent: 0,
            heartbeat_acks: 0,
            requests_completed: 0,
            requests_timed_out: 0,
            requests_failed: 0,
        }
    }

    /// Record a connection attempt.
    pub fn record_connection_attempt(&mut self) {
        self.connection_attempts += 1;
    }

    /// Record a successful connection at a specific time.
    pub fn record_connection_success_at(&mut self, now: Duration) {
        self.connections_established += 1;
        self.last_connected = Some(now);
        self.consecutive_failures = 0;
        self.current_reconnect_delay = Duration::ZERO;
        self.is_connected = true;
    }

    /// Record a connection failure at a specific time.
    pub fn record_connection_failure_at(&mut self, now: Duration, reconnect_delay: Duration) {
        self.connection_failures += 1;
        self.last_failure = Some(now);
        self.consecutive_failures += 1;
        self.current_reconnect_delay = reconnect_delay;
        self.is_connected = false;
    }

    /// Record the link going down.
    pub fn record_disconnected(&mut self) {
        self.is_connected = false;
    }

    /// Record a frame written to the link.
    pub fn record_message_sent(&mut self) {
        self.messages_sent += 1;
    }

    /// Record a frame read from the link.
    pub fn record_message_received(&mut self) {
        self.messages_received += 1;
    }

    /// Record a message placed in the offline queue.
    pub fn record_message_queued(&mut self) {
        self.messages_queued += 1;
    }

    /// Record a queue entry evicted by capacity pressure.
    pub fn record_message_evicted(&mut self) {
        self.messages_evicted += 1;
    }

    /// Record queue entries that aged out.
    pub fn record_messages_expired(&mut self, count: usize) {
        self.messages_expired += count as u64;
    }

    /// Record a queue entry discarded after its last retry.
    pub fn record_retry_exhausted(&mut self) {
        self.retries_exhausted += 1;
    }

    /// Record a stale state update.
    pub fn record_stale_update(&mut self) {
        self.stale_updates += 1;
    }

    /// Record sequence numbers declared lost.
    pub fn record_sequences_skipped(&mut self, count: u64) {
        self.sequences_skipped += count;
    }

    /// Record an undecodable inbound frame.
    pub fn record_malformed_frame(&mut self) {
        self.malformed_frames += 1;
    }

    /// Record an inbound frame of unknown type.
    pub fn record_unknown_frame(&mut self) {
        self.unknown_frames += 1;
    }

    /// Record a keep-alive written.
    pub fn record_heartbeat_sent(&mut self) {
        self.heartbeats_sent += 1;
    }

    /// Record a keep-alive acknowledgement.
    pub fn record_heartbeat_ack(&mut self) {
        self.heartbeat_acks += 1;
    }

    /// Record a request answered by the backend.
    pub fn record_request_completed(&mut self) {
        self.requests_completed += 1;
    }

    /// Record requests failed by timeout or sweep.
    pub fn record_requests_timed_out(&mut self, count: usize) {
        self.requests_timed_out += count as u64;
    }

    /// Record requests failed by teardown.
    pub fn record_requests_failed(&mut self, count: usize) {
        self.requests_failed += count as u64;
    }

    /// Total messages lost on the offline path.
    pub fn messages_lost(&self) -> u64 {
        self.messages_evicted + self.messages_expired + self.retries_exhausted
    }

    /// Calculate connection success rate as a percentage.
    pub fn connection_success_rate(&self) -> f64 {
        if self.connection_attempts == 0 {
            100.0
        } else {
            (self.connections_established as f64 / self.connection_attempts as f64) * 100.0
        }
    }

    /// Get time since last successful connection.
    pub fn time_since_last_connection(&self, now: Duration) -> Option<Duration> {
        self.last_connected.map(|t| now.saturating_sub(t))
    }
}
