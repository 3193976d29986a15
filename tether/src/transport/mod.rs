//! Transport adapters.
//!
//! A [`Transport`] opens a bidirectional text-frame link and hands back its
//! two halves. The supervisor owns them for the lifetime of one connection:
//! the sink moves into the writer task, the stream into the reader task.
//!
//! A stream returning `None` means the peer closed the link; an error means
//! it broke. Both end the connection and trigger a reconnect.

mod memory;
mod websocket;

use async_trait::async_trait;

use crate::error::TransportError;

pub use memory::{MemoryLink, MemoryServer, MemorySink, MemoryStream, MemoryTransport};
pub use websocket::{WebSocketFrames, WebSocketSink, WebSocketTransport};

/// Writing half of a link.
#[async_trait(?Send)]
pub trait FrameSink: 'static {
    /// Write one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the link gracefully. Errors are ignored.
    async fn close(&mut self);
}

/// Reading half of a link.
#[async_trait(?Send)]
pub trait FrameStream: 'static {
    /// Wait for the next text frame. `None` once the link is closed.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;
}

/// Factory for links to the backend.
#[async_trait(?Send)]
pub trait Transport: Clone + 'static {
    /// Writing half produced by [`connect`](Self::connect).
    type Sink: FrameSink;
    /// Reading half produced by [`connect`](Self::connect).
    type Stream: FrameStream;

    /// Open a link to `address`.
    async fn connect(&self, address: &str) -> Result<(Self::Sink, Self::Stream), TransportError>;
}
