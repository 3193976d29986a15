//! Inbound frame routing.
//!
//! ```text
//!   frame ─► decode ─┬─ state_update ──────────► ReorderBuffer ─► StateConsumer
//!                    ├─ response ──────────────► CorrelationTable
//!                    ├─ connection_established ► reorder reset + event
//!                    ├─ heartbeat_ack ─────────► metrics
//!                    ├─ application kinds ─────► EventBus
//!                    └─ unknown / malformed ───► logged, dropped
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;
use tether_core::Providers;

use crate::correlation::CorrelationTable;
use crate::envelope::Inbound;
use crate::events::{ClientEvent, EventBus};
use crate::metrics::ClientMetrics;
use crate::reorder::{Offer, ReorderBuffer};
use crate::state::StateConsumer;

/// What the dispatcher did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Connection confirmation handled.
    Confirmed,
    /// State update offered to the reorder buffer; `applied` updates reached
    /// the consumer as a result.
    State {
        /// Number of updates applied by this frame.
        applied: usize,
    },
    /// Response offered to the correlation table.
    Response {
        /// Whether a pending request was waiting for it.
        matched: bool,
    },
    /// Heartbeat acknowledgement recorded.
    HeartbeatAck,
    /// Application event published.
    Event,
    /// Unknown kind, dropped.
    Unknown,
    /// Undecodable frame, dropped.
    Malformed,
}

/// Routes decoded inbound frames to their consumers.
pub struct Dispatcher<P: Providers, C: StateConsumer> {
    correlation: Rc<CorrelationTable<P>>,
    reorder: RefCell<ReorderBuffer<Value>>,
    consumer: Rc<C>,
    events: Rc<EventBus>,
    metrics: Rc<RefCell<ClientMetrics>>,
}

impl<P: Providers, C: StateConsumer> Dispatcher<P, C> {
    /// Create a dispatcher over the given components.
    pub fn new(
        correlation: Rc<CorrelationTable<P>>,
        reorder_capacity: usize,
        consumer: Rc<C>,
        events: Rc<EventBus>,
        metrics: Rc<RefCell<ClientMetrics>>,
    ) -> Self {
        Self {
            correlation,
            reorder: RefCell::new(ReorderBuffer::new(reorder_capacity)),
            consumer,
            events,
            metrics,
        }
    }

    /// Next state sequence number expected.
    pub fn expected_sequence(&self) -> u64 {
        self.reorder.borrow().expected()
    }

    /// Forget all ordering state.
    pub fn reset_ordering(&self) {
        self.reorder.borrow_mut().clear();
    }

    /// Decode and route one text frame. Never fails: bad frames are dropped.
    pub fn dispatch(&self, text: &str) -> Routed {
        let inbound = match Inbound::decode(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::warn!("Dropping malformed frame: {}", e);
                self.metrics.borrow_mut().record_malformed_frame();
                return Routed::Malformed;
            }
        };

        match inbound {
            Inbound::ConnectionConfirmed {
                data,
                next_sequence,
            } => {
                if let Some(next) = next_sequence {
                    tracing::debug!("Backend announced next state sequence {}", next);
                    let released = self.reorder.borrow_mut().reset(next);
                    self.apply_all(released);
                }
                self.events
                    .publish(ClientEvent::ConnectionConfirmed { data });
                Routed::Confirmed
            }
            Inbound::StateUpdate { sequence, data } => {
                let offer = self.reorder.borrow_mut().offer(sequence, data);
                let applied = match offer {
                    Offer::Delivered(updates) => self.apply_all(updates),
                    Offer::GapSkipped { skipped, delivered } => {
                        tracing::warn!(
                            "Reorder buffer full, skipping lost sequences {}..{}",
                            skipped.start,
                            skipped.end
                        );
                        self.metrics
                            .borrow_mut()
                            .record_sequences_skipped(skipped.end - skipped.start);
                        self.events.publish(ClientEvent::SequenceGapSkipped {
                            from: skipped.start,
                            to: skipped.end,
                        });
                        self.apply_all(delivered)
                    }
                    Offer::Buffered => {
                        tracing::debug!(
                            "Buffered state update {} (expecting {})",
                            sequence,
                            self.expected_sequence()
                        );
                        0
                    }
                    Offer::Duplicate => {
                        tracing::debug!("Duplicate buffered state update {}", sequence);
                        0
                    }
                    Offer::Stale => {
                        tracing::debug!("Discarding stale state update {}", sequence);
                        self.metrics.borrow_mut().record_stale_update();
                        0
                    }
                };
                Routed::State { applied }
            }
            Inbound::Response { request_id, data } => {
                let matched = self.correlation.resolve(&request_id, data);
                Routed::Response { matched }
            }
            Inbound::HeartbeatAck { .. } => {
                self.metrics.borrow_mut().record_heartbeat_ack();
                Routed::HeartbeatAck
            }
            Inbound::Event { kind, data } => {
                self.events.publish(ClientEvent::Application { kind, data });
                Routed::Event
            }
            Inbound::Unknown { kind } => {
                tracing::warn!("Dropping frame of unknown type {:?}", kind);
                self.metrics.borrow_mut().record_unknown_frame();
                Routed::Unknown
            }
        }
    }

    fn apply_all(&self, updates: Vec<(u64, Value)>) -> usize {
        let count = updates.len();
        for (sequence, update) in updates {
            let merged = self.consumer.merge(update);
            self.consumer.apply_update(sequence, merged);
            self.events.publish(ClientEvent::StateApplied { sequence });
        }
        count
    }
}
