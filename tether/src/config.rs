//! Client configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration file. Durations are written in milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for the messaging client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend address handed to the transport
    pub server_address: String,

    /// Timeout for a single connection attempt
    #[serde(with = "millis", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,

    /// Interval between heartbeat messages while connected
    #[serde(with = "millis", rename = "heartbeat_interval_ms")]
    pub heartbeat_interval: Duration,

    /// Declare the link lost after this long without inbound traffic.
    ///
    /// Set to `Duration::ZERO` to disable.
    #[serde(with = "millis", rename = "heartbeat_timeout_ms")]
    pub heartbeat_timeout: Duration,

    /// Delay before the first reconnect attempt
    #[serde(with = "millis", rename = "base_reconnect_delay_ms")]
    pub base_reconnect_delay: Duration,

    /// Upper bound on the exponential reconnect delay
    #[serde(with = "millis", rename = "max_reconnect_delay_ms")]
    pub max_reconnect_delay: Duration,

    /// Width of the uniform jitter added to every reconnect delay
    #[serde(with = "millis", rename = "reconnect_jitter_ms")]
    pub reconnect_jitter: Duration,

    /// Exponential attempts before switching to fixed-interval retries
    pub max_reconnect_attempts: u32,

    /// Retry interval once exponential attempts are exhausted
    #[serde(with = "millis", rename = "fallback_retry_interval_ms")]
    pub fallback_retry_interval: Duration,

    /// Maximum number of entries held by the offline queue
    pub offline_queue_capacity: usize,

    /// Entries older than this are discarded
    #[serde(with = "millis", rename = "offline_queue_max_age_ms")]
    pub offline_queue_max_age: Duration,

    /// Storage key the offline queue is persisted under
    pub offline_queue_key: String,

    /// Send retries before a queued message is discarded
    pub max_send_retries: u32,

    /// Messages sent per drain batch
    pub drain_batch_size: usize,

    /// Per-message send timeout while draining
    #[serde(with = "millis", rename = "drain_send_timeout_ms")]
    pub drain_send_timeout: Duration,

    /// Pause between drained messages
    #[serde(with = "millis", rename = "drain_message_delay_ms")]
    pub drain_message_delay: Duration,

    /// Default timeout for correlated requests
    #[serde(with = "millis", rename = "response_timeout_ms")]
    pub response_timeout: Duration,

    /// Interval of the pending-response sweep
    #[serde(with = "millis", rename = "sweep_interval_ms")]
    pub sweep_interval: Duration,

    /// Extra age past the response timeout before the sweep fails a request
    #[serde(with = "millis", rename = "sweep_grace_ms")]
    pub sweep_grace: Duration,

    /// Maximum number of out-of-order state updates held back
    pub reorder_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "ws://127.0.0.1:8000/ws".to_string(),
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::ZERO,
            base_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            reconnect_jitter: Duration::from_secs(1),
            max_reconnect_attempts: 10,
            fallback_retry_interval: Duration::from_secs(30),
            offline_queue_capacity: 100,
            offline_queue_max_age: Duration::from_secs(7 * 24 * 60 * 60),
            offline_queue_key: "offline_queue".to_string(),
            max_send_retries: 3,
            drain_batch_size: 10,
            drain_send_timeout: Duration::from_secs(5),
            drain_message_delay: Duration::from_millis(100),
            response_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            sweep_grace: Duration::from_secs(5),
            reorder_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Configuration for a backend on the same machine: fast retries, short
    /// timeouts.
    pub fn local_backend() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            base_reconnect_delay: Duration::from_millis(250),
            max_reconnect_delay: Duration::from_secs(5),
            reconnect_jitter: Duration::from_millis(250),
            fallback_retry_interval: Duration::from_secs(10),
            ..Self::default()
        }
    }

    /// Configuration for a flaky remote backend: patient retries, a larger
    /// queue and heartbeat-based dead link detection.
    pub fn unstable_network() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(90),
            base_reconnect_delay: Duration::from_secs(2),
            max_reconnect_delay: Duration::from_secs(60),
            reconnect_jitter: Duration::from_secs(3),
            max_reconnect_attempts: 15,
            fallback_retry_interval: Duration::from_secs(60),
            offline_queue_capacity: 500,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check that the configuration can drive a client.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        }

        if self.server_address.trim().is_empty() {
            return invalid("server_address", "must not be empty");
        }
        for (field, value) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("connect_timeout", self.connect_timeout),
            ("drain_send_timeout", self.drain_send_timeout),
            ("sweep_interval", self.sweep_interval),
        ] {
            if value.is_zero() {
                return invalid(field, "must be greater than zero");
            }
        }
        if self.base_reconnect_delay > self.max_reconnect_delay {
            return invalid(
                "base_reconnect_delay",
                "must not exceed max_reconnect_delay",
            );
        }
        if self.offline_queue_capacity == 0 {
            return invalid("offline_queue_capacity", "must be at least 1");
        }
        if self.drain_batch_size == 0 {
            return invalid("drain_batch_size", "must be at least 1");
        }
        if self.reorder_capacity == 0 {
            return invalid("reorder_capacity", "must be at least 1");
        }
        if self.offline_queue_key.is_empty() {
            return invalid("offline_queue_key", "must not be empty");
        }
        Ok(())
    }

    /// Set the backend address.
    pub fn with_server_address(mut self, address: impl Into<String>) -> Self {
        self.server_address = address.into();
        self
    }

    /// Set the reconnect backoff parameters.
    pub fn with_backoff(mut self, base: Duration, max: Duration, jitter: Duration) -> Self {
        self.base_reconnect_delay = base;
        self.max_reconnect_delay = max;
        self.reconnect_jitter = jitter;
        self
    }

    /// Set how many exponential attempts run before fixed-interval retries,
    /// and that interval.
    pub fn with_retry_limit(mut self, attempts: u32, fallback_interval: Duration) -> Self {
        self.max_reconnect_attempts = attempts;
        self.fallback_retry_interval = fallback_interval;
        self
    }

    /// Set the heartbeat interval and the inbound-silence timeout.
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    /// Set the offline queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.offline_queue_capacity = capacity;
        self
    }

    /// Set the default response timeout.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the drain batching parameters.
    pub fn with_drain(mut self, batch_size: usize, send_timeout: Duration, delay: Duration) -> Self {
        self.drain_batch_size = batch_size;
        self.drain_send_timeout = send_timeout;
        self.drain_message_delay = delay;
        self
    }

    /// Set the reorder buffer capacity.
    pub fn with_reorder_capacity(mut self, capacity: usize) -> Self {
        self.reorder_capacity = capacity;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
