//! WebSocket transport over tokio-tungstenite.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{FrameSink, FrameStream, Transport};
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport dialling `ws://` addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a WebSocket transport.
    pub fn new() -> Self {
        Self
    }
}

/// Writing half of a WebSocket link.
pub struct WebSocketSink {
    inner: SplitSink<WsStream, WsMessage>,
}

/// Reading half of a WebSocket link.
pub struct WebSocketFrames {
    inner: SplitStream<WsStream>,
}

#[async_trait(?Send)]
impl Transport for WebSocketTransport {
    type Sink = WebSocketSink;
    type Stream = WebSocketFrames;

    async fn connect(&self, address: &str) -> Result<(Self::Sink, Self::Stream), TransportError> {
        let (stream, response) =
            connect_async(address)
                .await
                .map_err(|e| TransportError::ConnectFailed {
                    address: address.to_string(),
                    reason: e.to_string(),
                })?;
        tracing::debug!(
            "WebSocket handshake with {} completed ({})",
            address,
            response.status()
        );

        let (sink, stream) = stream.split();
        Ok((WebSocketSink { inner: sink }, WebSocketFrames { inner: stream }))
    }
}

#[async_trait(?Send)]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(WsMessage::text(text))
            .await
            .map_err(send_error)
    }

    async fn close(&mut self) {
        if let Err(e) = SinkExt::close(&mut self.inner).await {
            tracing::debug!("WebSocket close failed: {}", e);
        }
    }
}

/// Errors that mean the socket is gone become [`TransportError::Closed`],
/// which the client treats as link loss.
fn send_error(error: WsError) -> TransportError {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_) => {
            TransportError::Closed
        }
        other => TransportError::SendFailed(other.to_string()),
    }
}

#[async_trait(?Send)]
impl FrameStream for WebSocketFrames {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.inner.next().await {
                Some(Ok(WsMessage::Text(text))) => return Some(Ok(text.as_str().to_owned())),
                Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        tracing::warn!("Dropping non-UTF-8 binary frame ({} bytes)", data.len());
                        continue;
                    }
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    tracing::debug!("WebSocket closed by peer: {:?}", frame);
                    return None;
                }
                // tungstenite answers pings itself
                Some(Ok(WsMessage::Ping(_)))
                | Some(Ok(WsMessage::Pong(_)))
                | Some(Ok(WsMessage::Frame(_))) => continue,
                Some(Err(e)) => return Some(Err(TransportError::ReceiveFailed(e.to_string()))),
                None => return None,
            }
        }
    }
}
