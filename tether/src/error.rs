//! Error types for the tether messaging client.
//!
//! Only a few of these ever reach a caller. Transport failures are absorbed
//! by the supervisor and turned into reconnects, malformed frames are logged
//! and dropped. Request outcomes and configuration problems are the ones
//! surfaced through the public API.

use std::io;
use thiserror::Error;

/// Errors raised by a [`Transport`](crate::transport::Transport) adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection could not be established
    #[error("connect to {address} failed: {reason}")]
    ConnectFailed {
        /// Address that was dialled.
        address: String,
        /// Adapter-specific failure description.
        reason: String,
    },

    /// A frame could not be written
    #[error("send failed: {0}")]
    SendFailed(String),

    /// A frame could not be read
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// The link is closed
    #[error("transport closed")]
    Closed,

    /// The operation did not complete in time
    #[error("transport operation timed out")]
    Timeout,
}

/// Errors produced while decoding an inbound frame.
///
/// Every variant is recoverable: the frame is dropped and the connection
/// stays up.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The frame is not valid JSON or not an envelope.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The envelope has an empty `type` field.
    #[error("frame has an empty type")]
    MissingType,

    /// A state update arrived without a sequence number.
    #[error("state update without sequence number")]
    MissingSequence,

    /// A response arrived without a request id.
    #[error("response without request id")]
    MissingRequestId,
}

/// Failure outcome of a correlated request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// No response arrived within the request's timeout
    #[error("request {0} timed out")]
    Timeout(String),

    /// The periodic sweep found the request past its deadline
    #[error("request {0} expired")]
    Expired(String),

    /// The connection went away while the request was pending
    #[error("connection closed")]
    ConnectionClosed,

    /// The client has been shut down
    #[error("client shut down")]
    Shutdown,

    /// A request with this id is already pending
    #[error("request id {0} is already pending")]
    DuplicateId(String),

    /// The request payload could not be encoded
    #[error("request could not be encoded: {0}")]
    Encode(String),
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),

    /// The configuration is not valid JSON for [`ClientConfig`](crate::ClientConfig).
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds a value the client cannot run with.
    #[error("invalid config field `{field}`: {reason}")]
    Invalid {
        /// Offending field name.
        field: &'static str,
        /// Why the value is rejected.
        reason: String,
    },
}

/// Errors surfaced by the [`Client`](crate::Client) facade.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Persisted state could not be written.
    #[error("storage error: {0}")]
    Storage(#[from] io::Error),

    /// An outbound message could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The client has been shut down.
    #[error("client terminated")]
    Terminated,
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
