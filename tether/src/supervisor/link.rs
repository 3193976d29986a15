//! Tasks scoped to one live connection.
//!
//! A [`ConnectedScope`] is created when a link comes up and owns every task
//! that only makes sense while it is up:
//!
//! - `link_writer`: owns the sink, serializes writes.
//! - `link_reader`: owns the stream, feeds the dispatcher.
//! - `heartbeat`: periodic keep-alive, optional inbound-silence check.
//! - `correlation_sweep`: periodic expiry of overdue requests.
//!
//! Dropping the scope aborts all of them, so no timer outlives its link.

use std::rc::Rc;
use std::time::Duration;

use serde_json::json;
use tether_core::{KeyValueStore, Providers, TaskProvider, TimeProvider};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::shared::Shared;
use crate::envelope::KIND_HEARTBEAT;
use crate::error::TransportError;
use crate::state::StateConsumer;
use crate::transport::{FrameSink, FrameStream};

/// Notification that a link ended.
#[derive(Debug)]
pub(crate) struct LinkLost {
    pub(crate) generation: u64,
    pub(crate) reason: String,
}

/// Reports loss of one specific link generation to the supervisor.
#[derive(Debug, Clone)]
pub(crate) struct LossNotifier {
    tx: mpsc::UnboundedSender<LinkLost>,
    generation: u64,
}

impl LossNotifier {
    pub(crate) fn new(tx: mpsc::UnboundedSender<LinkLost>, generation: u64) -> Self {
        Self { tx, generation }
    }

    fn notify(&self, reason: impl Into<String>) {
        let _ = self.tx.send(LinkLost {
            generation: self.generation,
            reason: reason.into(),
        });
    }
}

enum WriteCommand {
    Frame {
        text: String,
        done: oneshot::Sender<Result<(), TransportError>>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// Handle for writing to the live link.
#[derive(Debug, Clone)]
pub(crate) struct LinkWriter {
    tx: mpsc::UnboundedSender<WriteCommand>,
}

impl std::fmt::Debug for WriteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Frame { text, .. } => write!(f, "Frame({} bytes)", text.len()),
            Self::Close { .. } => write!(f, "Close"),
        }
    }
}

impl LinkWriter {
    /// Write one frame. Fails with [`TransportError::Closed`] once the link
    /// is gone.
    pub(crate) async fn write(&self, text: String) -> Result<(), TransportError> {
        let (done, result) = oneshot::channel();
        self.tx
            .send(WriteCommand::Frame { text, done })
            .map_err(|_| TransportError::Closed)?;
        result.await.unwrap_or(Err(TransportError::Closed))
    }

    /// Close the link gracefully after pending writes.
    pub(crate) async fn close(&self) {
        let (done, closed) = oneshot::channel();
        if self.tx.send(WriteCommand::Close { done }).is_ok() {
            let _ = closed.await;
        }
    }
}

/// Owner of the tasks bound to one live link.
pub(crate) struct ConnectedScope {
    writer: LinkWriter,
    tasks: Vec<JoinHandle<()>>,
}

impl ConnectedScope {
    /// Spawn the link tasks over a freshly opened link.
    pub(crate) fn start<P, S, C, K, R>(
        shared: &Rc<Shared<P, S, C>>,
        sink: K,
        stream: R,
        loss: LossNotifier,
    ) -> Self
    where
        P: Providers,
        S: KeyValueStore,
        C: StateConsumer + 'static,
        K: FrameSink,
        R: FrameStream,
    {
        let task = shared.providers.task();
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = LinkWriter { tx };

        let tasks = vec![
            task.spawn_task("link_writer", writer_task(sink, rx, loss.clone())),
            task.spawn_task("link_reader", reader_task(shared.clone(), stream, loss.clone())),
            task.spawn_task(
                "heartbeat",
                heartbeat_task(shared.clone(), writer.clone(), loss),
            ),
            task.spawn_task("correlation_sweep", sweep_task(shared.clone())),
        ];

        Self { writer, tasks }
    }

    pub(crate) fn writer(&self) -> LinkWriter {
        self.writer.clone()
    }

    /// Close the link gracefully, waiting at most `timeout`, then stop every
    /// task.
    pub(crate) async fn close<T: TimeProvider>(self, time: &T, timeout: Duration) {
        if time.timeout(timeout, self.writer.close()).await.is_err() {
            tracing::debug!("Graceful close timed out after {:?}", timeout);
        }
    }
}

impl Drop for ConnectedScope {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn writer_task<K: FrameSink>(
    mut sink: K,
    mut commands: mpsc::UnboundedReceiver<WriteCommand>,
    loss: LossNotifier,
) {
    while let Some(command) = commands.recv().await {
        match command {
            WriteCommand::Frame { text, done } => {
                let result = sink.send(text).await;
                if result == Err(TransportError::Closed) {
                    loss.notify("link closed while writing");
                }
                let _ = done.send(result);
            }
            WriteCommand::Close { done } => {
                sink.close().await;
                let _ = done.send(());
                return;
            }
        }
    }
    sink.close().await;
}

async fn reader_task<P, S, C, R>(shared: Rc<Shared<P, S, C>>, mut stream: R, loss: LossNotifier)
where
    P: Providers,
    S: KeyValueStore,
    C: StateConsumer,
    R: FrameStream,
{
    loop {
        match stream.next_frame().await {
            Some(Ok(text)) => {
                shared.last_inbound.set(shared.providers.time().now());
                shared.metrics.borrow_mut().record_message_received();
                let routed = shared.dispatcher.dispatch(&text);
                tracing::trace!("Inbound frame routed: {:?}", routed);
            }
            Some(Err(e)) => {
                loss.notify(format!("receive failed: {}", e));
                return;
            }
            None => {
                loss.notify("closed by peer");
                return;
            }
        }
    }
}

/// Keep-alive frame sent on every heartbeat tick.
pub(crate) fn heartbeat_frame(timestamp_ms: u64) -> String {
    json!({ "type": KIND_HEARTBEAT, "data": { "timestamp": timestamp_ms } }).to_string()
}

async fn heartbeat_task<P, S, C>(shared: Rc<Shared<P, S, C>>, writer: LinkWriter, loss: LossNotifier)
where
    P: Providers,
    S: KeyValueStore,
    C: StateConsumer,
{
    let time = shared.providers.time().clone();
    let interval = shared.config.heartbeat_interval;
    let silence_limit = shared.config.heartbeat_timeout;

    loop {
        if time.sleep(interval).await.is_err() {
            return;
        }

        if silence_limit > Duration::ZERO {
            let silent_for = time.now().saturating_sub(shared.last_inbound.get());
            if silent_for > silence_limit {
                tracing::warn!("No inbound traffic for {:?}, dropping link", silent_for);
                loss.notify(format!("no inbound traffic for {:?}", silent_for));
                return;
            }
        }

        match writer.write(heartbeat_frame(shared.now_ms())).await {
            Ok(()) => shared.metrics.borrow_mut().record_heartbeat_sent(),
            Err(e) => tracing::debug!("Heartbeat not sent: {}", e),
        }
    }
}

async fn sweep_task<P, S, C>(shared: Rc<Shared<P, S, C>>)
where
    P: Providers,
    S: KeyValueStore,
    C: StateConsumer,
{
    let time = shared.providers.time().clone();
    loop {
        if time.sleep(shared.config.sweep_interval).await.is_err() {
            return;
        }
        let expired = shared.correlation.sweep(shared.config.sweep_grace);
        if !expired.is_empty() {
            tracing::warn!("Correlation sweep expired {} requests", expired.len());
        }
    }
}
