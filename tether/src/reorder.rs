//! Reorder buffer for sequenced state updates.
//!
//! The backend tags every state update with a sequence number. The transport
//! may deliver them out of order (reconnect races, backend retries), so the
//! buffer holds early arrivals until the gap before them is filled.
//!
//! # Invariants
//!
//! - `sequence < expected`: stale, discarded.
//! - `sequence == expected`: delivered immediately, then every contiguous
//!   buffered successor is delivered too.
//! - `sequence > expected`: buffered.
//! - At most `capacity` updates are buffered. Exceeding it declares the
//!   missing sequence numbers lost: `expected` jumps to the lowest buffered
//!   sequence and delivery resumes from there.
//!
//! Deliveries are therefore strictly increasing, and gap-free except for
//! ranges explicitly reported through [`Offer::GapSkipped`].
//!
//! Once `u64::MAX` has been delivered the stream is exhausted: every later
//! offer is stale until [`ReorderBuffer::reset`] or [`ReorderBuffer::clear`].

use std::collections::BTreeMap;
use std::ops::Range;

/// Outcome of offering an update to the buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Offer<T> {
    /// The update and any contiguous successors are ready, in order.
    Delivered(Vec<(u64, T)>),
    /// The update arrived early and is held back.
    Buffered,
    /// An update with this sequence number is already held back.
    Duplicate,
    /// The sequence number was already delivered or skipped.
    Stale,
    /// The buffer overflowed: `skipped` will never be delivered, `delivered`
    /// is ready in order.
    GapSkipped {
        /// Sequence numbers declared lost.
        skipped: Range<u64>,
        /// Updates released by the skip.
        delivered: Vec<(u64, T)>,
    },
}

/// Bounded reorder buffer.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    expected: u64,
    /// Set once `u64::MAX` was delivered and `expected` cannot advance.
    exhausted: bool,
    pending: BTreeMap<u64, T>,
    capacity: usize,
}

impl<T> ReorderBuffer<T> {
    /// Create a buffer expecting sequence 0 first.
    pub fn new(capacity: usize) -> Self {
        Self::starting_at(0, capacity)
    }

    /// Create a buffer expecting `expected` first.
    pub fn starting_at(expected: u64, capacity: usize) -> Self {
        Self {
            expected,
            exhausted: false,
            pending: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Next sequence number to deliver.
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Number of held-back updates.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Offer an update.
    pub fn offer(&mut self, sequence: u64, payload: T) -> Offer<T> {
        if self.exhausted || sequence < self.expected {
            return Offer::Stale;
        }

        if sequence == self.expected {
            let mut delivered = vec![(sequence, payload)];
            self.advance();
            self.drain_contiguous(&mut delivered);
            return Offer::Delivered(delivered);
        }

        if self.pending.contains_key(&sequence) {
            return Offer::Duplicate;
        }
        self.pending.insert(sequence, payload);

        if self.pending.len() <= self.capacity {
            return Offer::Buffered;
        }

        let Some(lowest) = self.pending.keys().next().copied() else {
            return Offer::Buffered;
        };
        let skipped = self.expected..lowest;
        self.expected = lowest;
        let mut delivered = Vec::new();
        self.drain_contiguous(&mut delivered);
        Offer::GapSkipped { skipped, delivered }
    }

    /// Restart the stream at `expected`, e.g. after the backend announces
    /// its next sequence number. Held-back updates below it are discarded;
    /// any now-contiguous ones are returned for delivery.
    pub fn reset(&mut self, expected: u64) -> Vec<(u64, T)> {
        self.pending = self.pending.split_off(&expected);
        self.expected = expected;
        self.exhausted = false;
        let mut delivered = Vec::new();
        self.drain_contiguous(&mut delivered);
        delivered
    }

    /// Forget everything and expect sequence 0.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.expected = 0;
        self.exhausted = false;
    }

    fn advance(&mut self) {
        match self.expected.checked_add(1) {
            Some(next) => self.expected = next,
            None => self.exhausted = true,
        }
    }

    fn drain_contiguous(&mut self, out: &mut Vec<(u64, T)>) {
        while !self.exhausted {
            let Some(payload) = self.pending.remove(&self.expected) else {
                break;
            };
            out.push((self.expected, payload));
            self.advance();
        }
    }
}
