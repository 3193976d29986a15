//! Client facade.
//!
//! [`Client`] is the single entry point the rest of an application holds.
//! It is constructed explicitly with its collaborators and passed by
//! reference to whatever needs it; there is no process-wide instance.
//!
//! ```rust,ignore
//! let (transport, _server) = MemoryTransport::pair();
//! let consumer = Rc::new(SnapshotConsumer::new());
//! let client = Client::new(
//!     TokioProviders::new(),
//!     transport,
//!     MemoryStore::new(),
//!     ClientConfig::default(),
//!     consumer.clone(),
//! )
//! .await?;
//! client.connect("ws://127.0.0.1:8000/ws");
//! ```
//!
//! Must be created and used inside a `tokio::task::LocalSet`.

use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;
use tether_core::{KeyValueStore, Providers, TaskProvider, TimeProvider};
use tokio::sync::{mpsc, oneshot};

use crate::config::ClientConfig;
use crate::envelope::OutboundMessage;
use crate::error::{ClientError, ClientResult, RequestError};
use crate::events::Subscription;
use crate::metrics::ClientMetrics;
use crate::offline::{PersistentQueue, QueueEntry};
use crate::state::StateConsumer;
use crate::supervisor::{Command, ConnectionState, Shared, Supervisor};
use crate::transport::Transport;

/// How a submitted message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the live link.
    Sent,
    /// Held in the offline queue for the next connection.
    Queued,
}

/// Reliable messaging client.
pub struct Client<P, S, C>
where
    P: Providers,
    S: KeyValueStore,
    C: StateConsumer + 'static,
{
    shared: Rc<Shared<P, S, C>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl<P, S, C> Client<P, S, C>
where
    P: Providers,
    S: KeyValueStore,
    C: StateConsumer + 'static,
{
    /// Create a client, restoring the offline queue from `store`.
    ///
    /// The client starts `Idle`; call [`connect`](Self::connect) to bring
    /// the link up.
    pub async fn new<T: Transport>(
        providers: P,
        transport: T,
        store: S,
        config: ClientConfig,
        consumer: Rc<C>,
    ) -> ClientResult<Self> {
        config.validate()?;

        let now_ms = u64::try_from(providers.time().unix_time().as_millis()).unwrap_or(u64::MAX);
        let queue = PersistentQueue::restore(
            store,
            config.offline_queue_key.clone(),
            config.offline_queue_capacity,
            config.offline_queue_max_age,
            now_ms,
        )
        .await;
        if !queue.is_empty() {
            tracing::info!("Restored {} offline messages", queue.len());
        }

        let shared = Rc::new(Shared::new(providers, config, queue, consumer));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::new(shared.clone(), transport, command_rx);
        shared
            .providers
            .task()
            .spawn_task("connection_supervisor", supervisor.run());

        Ok(Self { shared, commands })
    }

    /// Start connecting to `address`.
    ///
    /// Ignored while already connected or connecting. While waiting to
    /// reconnect this retries immediately.
    pub fn connect(&self, address: impl Into<String>) {
        if self.is_terminated() {
            tracing::debug!("connect called on terminated client");
            return;
        }
        let _ = self.commands.send(Command::Connect(address.into()));
    }

    /// Connect to the configured server address.
    pub fn connect_default(&self) {
        self.connect(self.shared.config.server_address.clone());
    }

    /// Close the link, fail pending requests and persist the offline queue.
    /// The client can connect again afterwards.
    pub async fn disconnect(&self) -> ClientResult<()> {
        if self.is_terminated() {
            return Err(ClientError::Terminated);
        }
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Disconnect(ack))
            .map_err(|_| ClientError::Terminated)?;
        done.await.map_err(|_| ClientError::Terminated)
    }

    /// Close the link, fail pending requests, discard all queued and
    /// buffered state including the persisted queue, and stop for good.
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> ClientResult<()> {
        if self.is_terminated() {
            return Ok(());
        }
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack)).is_err() {
            return Ok(());
        }
        let _ = done.await;
        Ok(())
    }

    /// Submit a message: sent now if connected, queued offline otherwise.
    pub async fn send(&self, message: OutboundMessage) -> ClientResult<Delivery> {
        if self.is_terminated() {
            return Err(ClientError::Terminated);
        }
        Ok(self.shared.send_or_queue(message).await?)
    }

    /// Send a request and wait for its response, bounded by the configured
    /// response timeout.
    pub async fn request(&self, kind: impl Into<String>, data: Value) -> Result<Value, RequestError> {
        let timeout = self.shared.config.response_timeout;
        self.request_with_timeout(kind, data, timeout).await
    }

    /// Send a request and wait at most `timeout` for its response.
    ///
    /// While disconnected the request is queued offline like any other
    /// message; its timeout keeps running.
    pub async fn request_with_timeout(
        &self,
        kind: impl Into<String>,
        data: Value,
        timeout: Duration,
    ) -> Result<Value, RequestError> {
        if self.is_terminated() {
            return Err(RequestError::Shutdown);
        }

        let correlation = &self.shared.correlation;
        let request_id = correlation.next_request_id();
        let response = correlation.register(request_id.clone(), timeout)?;
        let message = OutboundMessage::new(kind, data).with_request_id(request_id.clone());

        if let Err(e) = self.shared.send_or_queue(message).await {
            correlation.cancel(&request_id);
            self.shared.metrics.borrow_mut().record_requests_failed(1);
            return Err(RequestError::Encode(e.to_string()));
        }

        let result = response.await;
        {
            let mut metrics = self.shared.metrics.borrow_mut();
            match &result {
                Ok(_) => metrics.record_request_completed(),
                Err(RequestError::Timeout(_)) | Err(RequestError::Expired(_)) => {
                    metrics.record_requests_timed_out(1)
                }
                Err(_) => metrics.record_requests_failed(1),
            }
        }
        result
    }

    /// Subscribe to client events.
    pub fn subscribe(&self) -> Subscription {
        self.shared.events.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// Whether the link is up.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Snapshot of the client metrics.
    pub fn metrics(&self) -> ClientMetrics {
        self.shared.metrics.borrow().clone()
    }

    /// Number of messages in the offline queue.
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Copy of the offline queue in drain order.
    pub fn queued_messages(&self) -> Vec<QueueEntry> {
        self.shared.queue.snapshot()
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.correlation.len()
    }

    /// Next state sequence number the client expects.
    pub fn expected_sequence(&self) -> u64 {
        self.shared.dispatcher.expected_sequence()
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    fn is_terminated(&self) -> bool {
        self.state() == ConnectionState::Terminated
    }
}
