//! Bounded line-trace buffer.

use std::collections::VecDeque;

use crate::result::TraceEvent;

/// Ring buffer of the most recent trace events.
///
/// Once `capacity` events are held, each new event evicts the oldest one, so
/// the buffer always contains the latest events in execution order.
#[derive(Debug)]
pub struct TraceRecorder {
    events: VecDeque<TraceEvent>,
    capacity: usize,
    dropped: usize,
}

impl TraceRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn record(&mut self, event: TraceEvent) {
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events evicted (or refused) so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events.into()
    }
}
