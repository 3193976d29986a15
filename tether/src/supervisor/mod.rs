//! Connection supervisor.
//!
//! One background task owns the connection lifecycle:
//!
//! ```text
//!   Idle ──connect──► Connecting ──ok──► Connected
//!                        │  ▲               │ link lost
//!                  failed│  │retry timer    ▼
//!                        └► Reconnecting ◄──┘
//!
//!   any state ──shutdown──► Terminated (absorbing)
//! ```
//!
//! The task reacts to four inputs in a `select!` loop: commands from the
//! client facade, the result of the in-flight connect attempt, the reconnect
//! timer, and link-loss notifications from the connection-scoped tasks.

mod backoff;
mod drain;
mod link;
mod shared;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use tether_core::{KeyValueStore, Providers, TaskProvider, TimeProvider};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{RequestError, TransportError};
use crate::events::ClientEvent;
use crate::state::StateConsumer;
use crate::transport::Transport;

pub use backoff::{ReconnectPolicy, ScheduledRetry};
pub(crate) use shared::Shared;

use link::{ConnectedScope, LinkLost, LossNotifier};

/// Lifecycle state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected and not trying to.
    Idle,
    /// A connect attempt is in flight.
    Connecting,
    /// The link is up.
    Connected,
    /// Waiting for the next reconnect attempt.
    Reconnecting,
    /// Shut down for good.
    Terminated,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Requests from the client facade.
#[derive(Debug)]
pub(crate) enum Command {
    Connect(String),
    Disconnect(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

type ConnectAttempt<T> = Pin<
    Box<
        dyn Future<
            Output = Result<(<T as Transport>::Sink, <T as Transport>::Stream), TransportError>,
        >,
    >,
>;
type RetryTimer = Pin<Box<dyn Future<Output = ()>>>;

/// Background task driving the connection state machine.
pub(crate) struct Supervisor<P, T, S, C>
where
    P: Providers,
    T: Transport,
    S: KeyValueStore,
    C: StateConsumer + 'static,
{
    shared: Rc<Shared<P, S, C>>,
    transport: T,
    commands: mpsc::UnboundedReceiver<Command>,
    lost_tx: mpsc::UnboundedSender<LinkLost>,
    lost_rx: mpsc::UnboundedReceiver<LinkLost>,
    policy: ReconnectPolicy,
    address: Option<String>,
    scope: Option<ConnectedScope>,
    drain: Option<JoinHandle<()>>,
    generation: u64,
}

impl<P, T, S, C> Supervisor<P, T, S, C>
where
    P: Providers,
    T: Transport,
    S: KeyValueStore,
    C: StateConsumer + 'static,
{
    pub(crate) fn new(
        shared: Rc<Shared<P, S, C>>,
        transport: T,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        let policy = ReconnectPolicy::from_config(&shared.config);
        Self {
            shared,
            transport,
            commands,
            lost_tx,
            lost_rx,
            policy,
            address: None,
            scope: None,
            drain: None,
            generation: 0,
        }
    }

    /// Run until shutdown or until the client is dropped.
    pub(crate) async fn run(mut self) {
        let mut attempt: Option<ConnectAttempt<T>> = None;
        let mut retry: Option<RetryTimer> = None;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Connect(address)) => {
                        self.on_connect_command(address, &mut attempt, &mut retry);
                    }
                    Some(Command::Disconnect(ack)) => {
                        attempt = None;
                        retry = None;
                        self.close_link("disconnected by client").await;
                        let _ = ack.send(());
                    }
                    Some(Command::Shutdown(ack)) => {
                        // No connect may complete behind a closing link.
                        drop(attempt.take());
                        drop(retry.take());
                        self.shutdown().await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        tracing::debug!("Client dropped, stopping supervisor");
                        drop(attempt.take());
                        drop(retry.take());
                        self.close_link("client dropped").await;
                        break;
                    }
                },

                result = async {
                    match attempt.as_mut() {
                        Some(connecting) => connecting.await,
                        None => std::future::pending().await,
                    }
                } => {
                    attempt = None;
                    match result {
                        Ok((sink, stream)) => self.on_connected(sink, stream),
                        Err(e) => {
                            tracing::warn!("Connect to {} failed: {}", self.target(), e);
                            retry = Some(self.schedule_retry(true));
                        }
                    }
                }

                _ = async {
                    match retry.as_mut() {
                        Some(timer) => timer.await,
                        None => std::future::pending().await,
                    }
                } => {
                    retry = None;
                    attempt = Some(self.start_attempt());
                }

                Some(lost) = self.lost_rx.recv() => {
                    if lost.generation == self.generation && self.scope.is_some() {
                        self.on_link_lost(&lost.reason);
                        retry = Some(self.schedule_retry(false));
                    } else {
                        tracing::trace!("Ignoring loss of stale link {}", lost.generation);
                    }
                }
            }
        }
    }

    fn target(&self) -> String {
        self.address
            .clone()
            .unwrap_or_else(|| self.shared.config.server_address.clone())
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.shared.state.replace(state);
        if previous != state {
            tracing::debug!("Connection state {} -> {}", previous, state);
        }
    }

    fn on_connect_command(
        &mut self,
        address: String,
        attempt: &mut Option<ConnectAttempt<T>>,
        retry: &mut Option<RetryTimer>,
    ) {
        match self.shared.state.get() {
            ConnectionState::Connected | ConnectionState::Connecting => {
                tracing::debug!("Already {}, ignoring connect", self.shared.state.get());
            }
            ConnectionState::Terminated => {
                tracing::debug!("Client terminated, ignoring connect");
            }
            ConnectionState::Idle | ConnectionState::Reconnecting => {
                self.address = Some(address);
                *retry = None;
                *attempt = Some(self.start_attempt());
            }
        }
    }

    fn start_attempt(&mut self) -> ConnectAttempt<T> {
        let address = self.target();
        self.set_state(ConnectionState::Connecting);
        self.shared.metrics.borrow_mut().record_connection_attempt();
        tracing::info!("Connecting to {}", address);

        let transport = self.transport.clone();
        let time = self.shared.providers.time().clone();
        let timeout = self.shared.config.connect_timeout;
        Box::pin(async move {
            match time.timeout(timeout, transport.connect(&address)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            }
        })
    }

    fn on_connected(&mut self, sink: T::Sink, stream: T::Stream) {
        let shared = &self.shared;
        let now = shared.providers.time().now();

        self.generation += 1;
        self.policy.on_connected();
        shared.metrics.borrow_mut().record_connection_success_at(now);
        shared.last_inbound.set(now);

        let loss = LossNotifier::new(self.lost_tx.clone(), self.generation);
        let scope = ConnectedScope::start(shared, sink, stream, loss);
        let writer = scope.writer();
        *shared.link.borrow_mut() = Some(writer.clone());
        self.scope = Some(scope);

        self.set_state(ConnectionState::Connected);
        tracing::info!("Connected to {}", self.target());
        self.shared.publish(ClientEvent::Connected);

        // A drain from the previous link finishes putting entries back first.
        let previous = self.drain.take();
        let drain_shared = self.shared.clone();
        self.drain = Some(self.shared.providers.task().spawn_task("queue_drain", async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            drain::drain_queue(drain_shared, writer).await;
        }));
    }

    fn on_link_lost(&mut self, reason: &str) {
        tracing::warn!("Connection to {} lost: {}", self.target(), reason);
        self.teardown_link();
        self.shared.metrics.borrow_mut().record_disconnected();
        self.shared.publish(ClientEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Stop the link tasks and fail whatever was waiting on this link.
    fn teardown_link(&mut self) {
        self.scope = None;
        *self.shared.link.borrow_mut() = None;
        let failed = self.shared.fail_pending(RequestError::ConnectionClosed);
        if failed > 0 {
            tracing::info!("Failed {} pending requests on teardown", failed);
        }
    }

    fn schedule_retry(&mut self, failed_attempt: bool) -> RetryTimer {
        let retry = self.policy.next_retry(self.shared.providers.random());
        {
            let mut metrics = self.shared.metrics.borrow_mut();
            if failed_attempt {
                metrics.record_connection_failure_at(self.shared.providers.time().now(), retry.delay);
            } else {
                metrics.current_reconnect_delay = retry.delay;
            }
        }

        self.set_state(ConnectionState::Reconnecting);
        if retry.fixed_interval {
            tracing::info!("Retrying {} in {:?} (fixed interval)", self.target(), retry.delay);
        } else {
            tracing::info!(
                "Retrying {} in {:?} (attempt {})",
                self.target(),
                retry.delay,
                retry.attempt
            );
        }
        self.shared.publish(ClientEvent::Reconnecting {
            attempt: retry.attempt,
            delay: retry.delay,
            fixed_interval: retry.fixed_interval,
        });

        let time = self.shared.providers.time().clone();
        Box::pin(async move {
            let _ = time.sleep(retry.delay).await;
        })
    }

    /// Deliberately close the link, fail pending requests and persist the
    /// queue. Leaves the supervisor `Idle`.
    async fn close_link(&mut self, reason: &str) {
        let time = self.shared.providers.time().clone();
        let close_timeout = self.shared.config.drain_send_timeout;

        if let Some(scope) = self.scope.take() {
            *self.shared.link.borrow_mut() = None;
            scope.close(&time, close_timeout).await;
            self.shared.metrics.borrow_mut().record_disconnected();
            tracing::info!("Disconnected from {}: {}", self.target(), reason);
            self.shared.publish(ClientEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
        self.teardown_link();

        // An interrupted drain puts its remainder back before we persist.
        if let Some(drain) = self.drain.take() {
            let _ = drain.await;
        }
        if let Err(e) = self.shared.queue.persist().await {
            tracing::warn!("Failed to persist offline queue: {}", e);
        }

        if self.shared.state.get() != ConnectionState::Terminated {
            self.set_state(ConnectionState::Idle);
        }
    }

    async fn shutdown(&mut self) {
        tracing::info!("Shutting down client");
        self.close_link("client shut down").await;

        if let Err(e) = self.shared.queue.clear().await {
            tracing::warn!("Failed to clear persisted offline queue: {}", e);
        }
        self.shared.dispatcher.reset_ordering();
        self.set_state(ConnectionState::Terminated);
        self.shared.publish(ClientEvent::Terminated);
    }
}
