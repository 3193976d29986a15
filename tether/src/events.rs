//! Typed publish/subscribe of client lifecycle and application events.
//!
//! Subscribers hold a [`Subscription`] handle. Events are delivered to every
//! live subscriber through an unbounded channel, so a slow subscriber never
//! stalls the client. Dropping the handle or calling
//! [`Subscription::unsubscribe`] detaches it.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::envelope::EventKind;

/// Result of one offline-queue drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Entries written to the link.
    pub sent: usize,
    /// Entries whose send failed during this drain.
    pub failed: usize,
    /// Entries left in the queue afterwards.
    pub remaining: usize,
}

/// Why a queued message was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Evicted to make room for a newer or higher-priority message.
    Evicted,
    /// Older than the queue's maximum age.
    Expired,
    /// Failed to send too many times.
    RetriesExhausted,
}

/// Events published by a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The link is up.
    Connected,
    /// The link went down.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
    /// A reconnect attempt has been scheduled.
    Reconnecting {
        /// Attempt number within the current backoff run.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
        /// Whether exponential backoff gave up and fixed-interval retry is in use.
        fixed_interval: bool,
    },
    /// The backend confirmed the session.
    ConnectionConfirmed {
        /// Payload of the confirmation.
        data: Value,
    },
    /// A state update was handed to the consumer.
    StateApplied {
        /// Sequence number applied.
        sequence: u64,
    },
    /// Sequence numbers in `from..to` were declared lost.
    SequenceGapSkipped {
        /// First skipped sequence number.
        from: u64,
        /// First sequence number after the gap.
        to: u64,
    },
    /// A pass-through application event from the backend.
    Application {
        /// Event kind.
        kind: EventKind,
        /// Event payload.
        data: Value,
    },
    /// The offline queue finished draining.
    QueueDrained(DrainSummary),
    /// A queued message was discarded.
    MessageDropped {
        /// Deduplication key of the lost message.
        dedup_key: String,
        /// Why it was discarded.
        reason: DropReason,
    },
    /// The client has been shut down; no further events follow.
    Terminated,
}

type SubscriberList = RefCell<Vec<(u64, mpsc::UnboundedSender<ClientEvent>)>>;

/// Fan-out hub for [`ClientEvent`]s.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: SubscriberList,
    next_id: Cell<u64>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Attach a new subscriber.
    pub fn subscribe(self: &Rc<Self>) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.borrow_mut().push((id, tx));
        Subscription {
            id,
            receiver: rx,
            bus: Rc::downgrade(self),
            attached: true,
        }
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Deliver `event` to every subscriber.
    pub fn publish(&self, event: ClientEvent) {
        tracing::trace!("Publishing {:?}", event);
        self.subscribers
            .borrow_mut()
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    fn detach(&self, id: u64) {
        self.subscribers.borrow_mut().retain(|(sid, _)| *sid != id);
    }
}

/// Handle to a subscription on an [`EventBus`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<ClientEvent>,
    bus: Weak<EventBus>,
    attached: bool,
}

impl Subscription {
    /// Wait for the next event.
    ///
    /// Returns `None` once unsubscribed or once the bus is gone and every
    /// buffered event has been read.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.receiver.recv().await
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drain every buffered event.
    pub fn drain(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }

    /// Stop receiving events. Events already buffered can still be read.
    pub fn unsubscribe(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;
        if let Some(bus) = self.bus.upgrade() {
            bus.detach(self.id);
        }
        self.receiver.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
