//! Local event log
//!
//! In local mode flushed events land here instead of on the network. The log
//! is bounded; when full the oldest events are evicted first.

use crate::event::PricedEvent;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Bounded in-memory store of delivered events
#[derive(Debug)]
pub struct LocalEventLog {
    events: Mutex<VecDeque<PricedEvent>>,
    capacity: usize,
}

impl LocalEventLog {
    /// Create a log holding at most `capacity` events
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Append events in order; returns how many old events were evicted
    pub fn extend(&self, batch: impl IntoIterator<Item = PricedEvent>) -> usize {
        let mut events = self.events.lock();
        events.extend(batch);

        let overflow = events.len().saturating_sub(self.capacity);
        events.drain(..overflow);
        overflow
    }

    /// Copy of the stored events, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<PricedEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Remove all stored events, returning how many there were
    pub fn clear(&self) -> usize {
        let mut events = self.events.lock();
        let n = events.len();
        events.clear();
        n
    }

    /// Number of stored events
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Maximum number of stored events
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
