//! Wire envelope and typed message kinds.
//!
//! Every frame exchanged with the backend is a JSON envelope:
//!
//! ```text
//! { "type": "<kind>", "data": { ... }, "sequence": 12, "request_id": "req-..." }
//! ```
//!
//! `sequence` is only present on ordered state updates, `request_id` only on
//! correlated requests and their responses. Inbound envelopes are validated
//! into the closed [`Inbound`] enum at decode time; kinds the client does not
//! know become [`Inbound::Unknown`] instead of an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FrameError;
use crate::offline::{dedup_key, Priority};

/// Kind tag of the backend's connection confirmation.
pub const KIND_CONNECTION_ESTABLISHED: &str = "connection_established";
/// Kind tag of ordered state updates.
pub const KIND_STATE_UPDATE: &str = "state_update";
/// Kind tag of responses to correlated requests.
pub const KIND_RESPONSE: &str = "response";
/// Kind tag of outbound keep-alive messages.
pub const KIND_HEARTBEAT: &str = "heartbeat";
/// Kind tag of the backend's heartbeat acknowledgement.
pub const KIND_HEARTBEAT_ACK: &str = "heartbeat_ack";

/// Raw envelope as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: String,

    /// Kind-specific payload.
    #[serde(default)]
    pub data: Value,

    /// Sequence number of an ordered state update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,

    /// Correlation id of a request or response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Application event kinds passed straight through to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Something the character decided to do (`angela_action`).
    Action,
    /// A user-facing notification (`notification`).
    Notification,
    /// A chat message from the backend (`chat_message`).
    Chat,
    /// Backend status report (`system_status`).
    System,
    /// Backend-side error report (`error`).
    ServerError,
}

impl EventKind {
    /// Map a wire kind to an event kind, if it is one.
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "angela_action" => Some(Self::Action),
            "notification" => Some(Self::Notification),
            "chat_message" => Some(Self::Chat),
            "system_status" => Some(Self::System),
            "error" => Some(Self::ServerError),
            _ => None,
        }
    }

    /// Wire tag of this event kind.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Action => "angela_action",
            Self::Notification => "notification",
            Self::Chat => "chat_message",
            Self::System => "system_status",
            Self::ServerError => "error",
        }
    }
}

/// A validated inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The backend accepted the connection.
    ConnectionConfirmed {
        /// Confirmation payload.
        data: Value,
        /// Next state sequence number the backend will send, if announced.
        next_sequence: Option<u64>,
    },
    /// An ordered state update.
    StateUpdate {
        /// Position in the backend's update stream.
        sequence: u64,
        /// Opaque update payload.
        data: Value,
    },
    /// Response to a correlated request.
    Response {
        /// Correlation id of the request being answered.
        request_id: String,
        /// Response payload.
        data: Value,
    },
    /// Acknowledgement of one of our heartbeats.
    HeartbeatAck {
        /// Acknowledgement payload.
        data: Value,
    },
    /// Free-form application event.
    Event {
        /// Event kind.
        kind: EventKind,
        /// Event payload.
        data: Value,
    },
    /// A well-formed envelope of a kind this client does not handle.
    Unknown {
        /// The unrecognised kind tag.
        kind: String,
    },
}

impl Inbound {
    /// Parse and classify a text frame.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::try_from(envelope)
    }
}

impl TryFrom<Envelope> for Inbound {
    type Error = FrameError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let Envelope {
            kind,
            data,
            sequence,
            request_id,
        } = envelope;

        if kind.trim().is_empty() {
            return Err(FrameError::MissingType);
        }

        match kind.as_str() {
            KIND_CONNECTION_ESTABLISHED => {
                let next_sequence = sequence.or_else(|| data.get("sequence")?.as_u64());
                Ok(Self::ConnectionConfirmed {
                    data,
                    next_sequence,
                })
            }
            KIND_STATE_UPDATE => {
                let sequence = sequence.ok_or(FrameError::MissingSequence)?;
                Ok(Self::StateUpdate { sequence, data })
            }
            KIND_RESPONSE => {
                let request_id = request_id
                    .or_else(|| data.get("request_id")?.as_str().map(str::to_owned))
                    .ok_or(FrameError::MissingRequestId)?;
                Ok(Self::Response { request_id, data })
            }
            KIND_HEARTBEAT_ACK | "pong" => Ok(Self::HeartbeatAck { data }),
            other => match EventKind::from_wire(other) {
                Some(kind) => Ok(Self::Event { kind, data }),
                None => Ok(Self::Unknown { kind }),
            },
        }
    }
}

/// A message submitted for delivery to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: String,

    /// Kind-specific payload.
    #[serde(default)]
    pub data: Value,

    /// Correlation id when the message expects a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl OutboundMessage {
    /// Create a message of the given kind.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            request_id: None,
        }
    }

    /// Attach a correlation id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Delivery priority derived from the kind.
    pub fn priority(&self) -> Priority {
        Priority::for_kind(&self.kind)
    }

    /// Identity used to collapse duplicate submissions.
    pub fn dedup_key(&self) -> String {
        dedup_key(self)
    }

    /// Serialize to a wire frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Envelope {
            kind: self.kind.clone(),
            data: self.data.clone(),
            sequence: None,
            request_id: self.request_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_state_update() {
        let inbound = Inbound::decode(r#"{"type":"state_update","data":{"mood":"happy"},"sequence":4}"#)
            .expect("decode");
        assert_eq!(
            inbound,
            Inbound::StateUpdate {
                sequence: 4,
                data: json!({"mood": "happy"}),
            }
        );
    }

    #[test]
    fn test_state_update_requires_sequence() {
        let err = Inbound::decode(r#"{"type":"state_update","data":{}}"#).expect_err("no sequence");
        assert!(matches!(err, FrameError::MissingSequence));
    }

    #[test]
    fn test_response_id_from_envelope_or_data() {
        let top = Inbound::decode(r#"{"type":"response","request_id":"req-1","data":{"ok":true}}"#)
            .expect("decode");
        assert!(matches!(top, Inbound::Response { ref request_id, .. } if request_id == "req-1"));

        let nested = Inbound::decode(r#"{"type":"response","data":{"request_id":"req-2"}}"#)
            .expect("decode");
        assert!(matches!(nested, Inbound::Response { ref request_id, .. } if request_id == "req-2"));

        let missing = Inbound::decode(r#"{"type":"response","data":{}}"#);
        assert!(matches!(missing, Err(FrameError::MissingRequestId)));
    }

    #[test]
    fn test_connection_confirmation_announces_sequence() {
        let inbound = Inbound::decode(
            r#"{"type":"connection_established","data":{"session":"s1","sequence":17}}"#,
        )
        .expect("decode");
        assert!(matches!(
            inbound,
            Inbound::ConnectionConfirmed {
                next_sequence: Some(17),
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_kind_is_not_an_error() {
        let inbound = Inbound::decode(r#"{"type":"hologram","data":{}}"#).expect("decode");
        assert_eq!(
            inbound,
            Inbound::Unknown {
                kind: "hologram".to_string()
            }
        );
    }

    #[test]
    fn test_event_kinds_round_trip_through_wire_tags() {
        for kind in [
            EventKind::Action,
            EventKind::Notification,
            EventKind::Chat,
            EventKind::System,
            EventKind::ServerError,
        ] {
            assert_eq!(EventKind::from_wire(kind.as_wire()), Some(kind));
        }
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(Inbound::decode("not json"), Err(FrameError::Malformed(_))));
        assert!(matches!(Inbound::decode(r#"{"data":{}}"#), Err(FrameError::Malformed(_))));
        assert!(matches!(
            Inbound::decode(r#"{"type":"  "}"#),
            Err(FrameError::MissingType)
        ));
    }

    #[test]
    fn test_outbound_encoding_omits_absent_fields() {
        let msg = OutboundMessage::new("chat", json!({"text": "hi"}));
        let text = msg.encode().expect("encode");
        let value: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value, json!({"type": "chat", "data": {"text": "hi"}}));

        let request = msg.with_request_id("req-9");
        let value: Value = serde_json::from_str(&request.encode().expect("encode")).expect("json");
        assert_eq!(value["request_id"], json!("req-9"));
    }
}
