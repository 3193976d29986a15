//! Consumers of ordered state updates.

use std::cell::RefCell;

use serde_json::{Map, Value};

/// Receives state updates in strictly increasing sequence order.
///
/// The client calls [`merge`](Self::merge) and then
/// [`apply_update`](Self::apply_update) once per delivered sequence number,
/// never out of order and never twice for the same number.
pub trait StateConsumer {
    /// Combine an incoming update with the consumer's current state.
    ///
    /// The default passes the update through unchanged.
    fn merge(&self, update: Value) -> Value {
        update
    }

    /// Apply a merged update.
    fn apply_update(&self, sequence: u64, merged: Value);
}

/// Stock consumer keeping the latest merged state in memory.
///
/// Object updates are shallow-merged into the current state: top-level keys
/// in the update replace those in the state, other keys are kept. Any
/// non-object update replaces the state outright.
#[derive(Debug)]
pub struct SnapshotConsumer {
    state: RefCell<Value>,
    applied: RefCell<Vec<u64>>,
}

impl SnapshotConsumer {
    /// Create a consumer with an empty object as initial state.
    pub fn new() -> Self {
        Self {
            state: RefCell::new(Value::Object(Map::new())),
            applied: RefCell::new(Vec::new()),
        }
    }

    /// Current merged state.
    pub fn state(&self) -> Value {
        self.state.borrow().clone()
    }

    /// Sequence numbers applied so far, in application order.
    pub fn applied(&self) -> Vec<u64> {
        self.applied.borrow().clone()
    }

    /// Last applied sequence number.
    pub fn last_sequence(&self) -> Option<u64> {
        self.applied.borrow().last().copied()
    }
}

impl Default for SnapshotConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl StateConsumer for SnapshotConsumer {
    fn merge(&self, update: Value) -> Value {
        match (&*self.state.borrow(), update) {
            (Value::Object(current), Value::Object(incoming)) => {
                let mut merged = current.clone();
                merged.extend(incoming);
                Value::Object(merged)
            }
            (_, other) => other,
        }
    }

    fn apply_update(&self, sequence: u64, merged: Value) {
        *self.state.borrow_mut() = merged;
        self.applied.borrow_mut().push(sequence);
    }
}
