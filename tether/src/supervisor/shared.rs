//! State shared between the client facade, the supervisor and the
//! connection-scoped tasks.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use tether_core::{KeyValueStore, Providers, TimeProvider};

use super::link::LinkWriter;
use super::ConnectionState;
use crate::client::Delivery;
use crate::config::ClientConfig;
use crate::correlation::CorrelationTable;
use crate::dispatcher::Dispatcher;
use crate::envelope::OutboundMessage;
use crate::error::RequestError;
use crate::events::{ClientEvent, DropReason, EventBus};
use crate::metrics::ClientMetrics;
use crate::offline::{EnqueueOutcome, PersistentQueue, QueueEntry};
use crate::state::StateConsumer;

/// Everything the client's tasks need, behind one `Rc`.
pub(crate) struct Shared<P: Providers, S: KeyValueStore, C: StateConsumer> {
    pub(crate) providers: P,
    pub(crate) config: ClientConfig,
    pub(crate) queue: PersistentQueue<S>,
    pub(crate) correlation: Rc<CorrelationTable<P>>,
    pub(crate) dispatcher: Dispatcher<P, C>,
    pub(crate) events: Rc<EventBus>,
    pub(crate) metrics: Rc<RefCell<ClientMetrics>>,
    pub(crate) state: Cell<ConnectionState>,
    /// Writer of the live link; `None` unless connected.
    pub(crate) link: RefCell<Option<LinkWriter>>,
    /// Monotonic time of the last inbound frame.
    pub(crate) last_inbound: Cell<Duration>,
}

impl<P: Providers, S: KeyValueStore, C: StateConsumer> Shared<P, S, C> {
    pub(crate) fn new(
        providers: P,
        config: ClientConfig,
        queue: PersistentQueue<S>,
        consumer: Rc<C>,
    ) -> Self {
        let correlation = CorrelationTable::new(providers.clone());
        let events = EventBus::new();
        let metrics = Rc::new(RefCell::new(ClientMetrics::new()));
        let dispatcher = Dispatcher::new(
            correlation.clone(),
            config.reorder_capacity,
            consumer,
            events.clone(),
            metrics.clone(),
        );
        Self {
            providers,
            config,
            queue,
            correlation,
            dispatcher,
            events,
            metrics,
            state: Cell::new(ConnectionState::Idle),
            link: RefCell::new(None),
            last_inbound: Cell::new(Duration::ZERO),
        }
    }

    /// Wall-clock milliseconds, the timebase of queue entries.
    pub(crate) fn now_ms(&self) -> u64 {
        u64::try_from(self.providers.time().unix_time().as_millis()).unwrap_or(u64::MAX)
    }

    pub(crate) fn publish(&self, event: ClientEvent) {
        self.events.publish(event);
    }

    pub(crate) fn current_link(&self) -> Option<LinkWriter> {
        self.link.borrow().clone()
    }

    /// Write `message` on the live link, or queue it offline when there is
    /// no link or the write fails.
    pub(crate) async fn send_or_queue(
        &self,
        message: OutboundMessage,
    ) -> Result<Delivery, serde_json::Error> {
        let text = message.encode()?;

        if let Some(link) = self.current_link() {
            let timeout = self.config.drain_send_timeout;
            match self.providers.time().timeout(timeout, link.write(text)).await {
                Ok(Ok(())) => {
                    self.metrics.borrow_mut().record_message_sent();
                    return Ok(Delivery::Sent);
                }
                Ok(Err(e)) => {
                    tracing::debug!("Send of {} failed ({}), queueing offline", message.kind, e)
                }
                Err(_) => tracing::debug!(
                    "Send of {} timed out after {:?}, queueing offline",
                    message.kind,
                    timeout
                ),
            }
        }

        self.enqueue_offline(message).await;
        Ok(Delivery::Queued)
    }

    pub(crate) async fn enqueue_offline(&self, message: OutboundMessage) {
        let outcome = self.queue.enqueue(message, self.now_ms()).await;
        self.metrics.borrow_mut().record_message_queued();
        match &outcome {
            EnqueueOutcome::Inserted { id, .. } => {
                tracing::debug!("Queued offline as entry {} ({} queued)", id, self.queue.len())
            }
            EnqueueOutcome::Refreshed { id, retry_count } => tracing::debug!(
                "Refreshed queued entry {} (retry count {})",
                id,
                retry_count
            ),
        }
        self.note_eviction(outcome);
    }

    /// Report the entry a queue insertion pushed out, if any.
    pub(crate) fn note_eviction(&self, outcome: EnqueueOutcome) {
        if let EnqueueOutcome::Inserted {
            evicted: Some(entry),
            ..
        } = outcome
        {
            tracing::warn!(
                "Offline queue full, evicted {} ({:?}, queued at {})",
                entry.dedup_key,
                entry.priority,
                entry.queued_at_ms
            );
            self.metrics.borrow_mut().record_message_evicted();
            self.report_dropped(entry, DropReason::Evicted);
        }
    }

    pub(crate) fn report_dropped(&self, entry: QueueEntry, reason: DropReason) {
        self.publish(ClientEvent::MessageDropped {
            dedup_key: entry.dedup_key,
            reason,
        });
    }

    /// Fail every pending request, returning how many were failed.
    pub(crate) fn fail_pending(&self, error: RequestError) -> usize {
        self.correlation.fail_all(error)
    }
}
