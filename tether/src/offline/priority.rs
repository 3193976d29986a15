//! Priority tiers and dedup keys for outbound messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::OutboundMessage;

/// Delivery priority of a queued message. Higher drains first and is evicted
/// last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Anything not otherwise classified.
    Lowest = 0,
    /// Chat, logs and informational traffic.
    Low = 1,
    /// State, tactile and performance updates.
    Medium = 2,
    /// Emergencies, alerts and critical messages.
    High = 3,
}

const HIGH_MARKERS: &[&str] = &["emergency", "alert", "critical"];
const MEDIUM_MARKERS: &[&str] = &["state", "tactile", "performance"];
const LOW_MARKERS: &[&str] = &["chat", "log", "info"];

impl Priority {
    /// Classify a message kind. The highest matching tier wins.
    pub fn for_kind(kind: &str) -> Self {
        let kind = kind.to_ascii_lowercase();
        let matches = |markers: &[&str]| markers.iter().any(|m| kind.contains(m));

        if matches(HIGH_MARKERS) {
            Self::High
        } else if matches(MEDIUM_MARKERS) {
            Self::Medium
        } else if matches(LOW_MARKERS) {
            Self::Low
        } else {
            Self::Lowest
        }
    }
}

/// Fields of `data` that identify the subject of a message.
const IDENTITY_FIELDS: &[&str] = &["id", "request_id", "key", "target"];

/// Derive the identity used to collapse duplicate submissions.
///
/// Format: `kind:action:identity`. `action` is `data.action` (or `-`).
/// `identity` is the message's request id or the first identifying field of
/// `data`; a message with neither is identified by a checksum of its
/// payload, so only byte-identical payloads collapse.
pub fn dedup_key(message: &OutboundMessage) -> String {
    let action = message
        .data
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or("-");

    let identity = message.request_id.clone().or_else(|| {
        IDENTITY_FIELDS
            .iter()
            .find_map(|field| scalar_to_string(message.data.get(*field)?))
    });

    match identity {
        Some(identity) => format!("{}:{}:{}", message.kind, action, identity),
        None => {
            let canonical = serde_json::to_vec(&message.data).unwrap_or_default();
            format!(
                "{}:{}:#{:08x}",
                message.kind,
                action,
                crc32c::crc32c(&canonical)
            )
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
