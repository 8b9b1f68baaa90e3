//! Per-subscription event reordering.
//!
//! Relays stream stored events in whatever order their backends produce.
//! Incoming events are parked here briefly and delivered in protocol
//! order: `created_at` descending, event id ascending-lex as tie-break.
//! The buffer is drained on a timer and eagerly on EOSE.

use std::sync::Mutex;

use crate::types::event::Event;

pub struct OrderingBuffer {
    events: Mutex<Vec<Event>>,
    capacity: usize,
}

impl OrderingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Park an event. Returns true when the buffer hit capacity and the
    /// caller should flush early.
    pub fn push(&self, event: Event) -> bool {
        let mut events = self.events.lock().unwrap();
        events.push(event);
        events.len() >= self.capacity
    }

    /// Take everything, sorted into delivery order.
    pub fn drain_sorted(&self) -> Vec<Event> {
        let mut events = {
            let mut guard = self.events.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        events.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        events
    }

    /// Drop everything without delivery. Used on disconnect.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}
