//! In-process loopback transport.
//!
//! [`MemoryTransport::pair`] returns the client-side transport and a
//! [`MemoryServer`] standing in for the backend. Each successful connect
//! produces a [`MemoryLink`] on the server side that can push frames to the
//! client, read what the client wrote, and close the link.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{FrameSink, FrameStream, Transport};
use crate::error::TransportError;

#[derive(Debug)]
struct Shared {
    incoming: mpsc::UnboundedSender<MemoryLink>,
    refusing: Cell<bool>,
    failing_sends: Rc<Cell<bool>>,
    connects: Cell<u64>,
    addresses: RefCell<Vec<String>>,
}

/// Client side of the loopback.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    shared: Rc<Shared>,
}

/// Backend side of the loopback.
#[derive(Debug)]
pub struct MemoryServer {
    shared: Rc<Shared>,
    accepted: mpsc::UnboundedReceiver<MemoryLink>,
}

/// One accepted connection, seen from the backend.
#[derive(Debug)]
pub struct MemoryLink {
    address: String,
    to_client: Option<mpsc::UnboundedSender<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

/// Writing half handed to the client.
#[derive(Debug)]
pub struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
    failing: Rc<Cell<bool>>,
}

/// Reading half handed to the client.
#[derive(Debug)]
pub struct MemoryStream {
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryTransport {
    /// Create a connected transport/server pair.
    pub fn pair() -> (Self, MemoryServer) {
        let (incoming, accepted) = mpsc::unbounded_channel();
        let shared = Rc::new(Shared {
            incoming,
            refusing: Cell::new(false),
            failing_sends: Rc::new(Cell::new(false)),
            connects: Cell::new(0),
            addresses: RefCell::new(Vec::new()),
        });
        (
            Self {
                shared: shared.clone(),
            },
            MemoryServer { shared, accepted },
        )
    }
}

#[async_trait(?Send)]
impl Transport for MemoryTransport {
    type Sink = MemorySink;
    type Stream = MemoryStream;

    async fn connect(&self, address: &str) -> Result<(Self::Sink, Self::Stream), TransportError> {
        self.shared.addresses.borrow_mut().push(address.to_string());
        if self.shared.refusing.get() {
            return Err(TransportError::ConnectFailed {
                address: address.to_string(),
                reason: "connection refused".into(),
            });
        }

        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        let link = MemoryLink {
            address: address.to_string(),
            to_client: Some(server_tx),
            from_client: server_rx,
        };
        if self.shared.incoming.send(link).is_err() {
            return Err(TransportError::ConnectFailed {
                address: address.to_string(),
                reason: "server gone".into(),
            });
        }
        self.shared.connects.set(self.shared.connects.get() + 1);

        Ok((
            MemorySink {
                tx: Some(client_tx),
                failing: self.shared.failing_sends.clone(),
            },
            MemoryStream { rx: client_rx },
        ))
    }
}

#[async_trait(?Send)]
impl FrameSink for MemorySink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.failing.get() {
            return Err(TransportError::SendFailed("injected send failure".into()));
        }
        match &self.tx {
            Some(tx) => tx.send(text).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

#[async_trait(?Send)]
impl FrameStream for MemoryStream {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

impl MemoryServer {
    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> Option<MemoryLink> {
        self.accepted.recv().await
    }

    /// Take a pending connection without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryLink> {
        self.accepted.try_recv().ok()
    }

    /// Make subsequent connects fail (or succeed again).
    pub fn set_refusing(&self, refusing: bool) {
        self.shared.refusing.set(refusing);
    }

    /// Make every client write fail while the link stays up.
    pub fn set_failing_sends(&self, failing: bool) {
        self.shared.failing_sends.set(failing);
    }

    /// Number of connects that succeeded.
    pub fn connect_count(&self) -> u64 {
        self.shared.connects.get()
    }

    /// Every address dialled, including refused attempts.
    pub fn dialled(&self) -> Vec<String> {
        self.shared.addresses.borrow().clone()
    }
}

impl MemoryLink {
    /// Address the client dialled.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Push a raw text frame to the client. `false` if the link is closed.
    pub fn send(&self, text: impl Into<String>) -> bool {
        match &self.to_client {
            Some(tx) => tx.send(text.into()).is_ok(),
            None => false,
        }
    }

    /// Push a JSON frame to the client.
    pub fn send_json(&self, frame: &Value) -> bool {
        self.send(frame.to_string())
    }

    /// Wait for the next frame the client wrote. `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Wait for the next frame and parse it as JSON, skipping anything else.
    pub async fn recv_json(&mut self) -> Option<Value> {
        loop {
            let text = self.recv().await?;
            if let Ok(value) = serde_json::from_str(&text) {
                return Some(value);
            }
        }
    }

    /// Take a frame the client wrote without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Drop the link from the backend side.
    pub fn close(&mut self) {
        self.to_client = None;
        self.from_client.close();
    }

    /// Whether the backend side has closed the link.
    pub fn is_closed(&self) -> bool {
        self.to_client.is_none()
    }
}
