//! History buffer
//!
//! Keeps the last N events so a late joiner gets the recent history instead
//! of just the latest value. A buffer node is persistent: it keeps filling
//! even with no sinks attached.

use std::collections::VecDeque;

use super::Stage;
use crate::event::ValueEvent;

/// Bounded ring of recent events
#[derive(Debug)]
pub struct Buffer {
    capacity: usize,
    events: VecDeque<ValueEvent>,
}

impl Buffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffered events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Stage for Buffer {
    fn name(&self) -> &'static str {
        "buffer"
    }

    fn process(&mut self, event: ValueEvent) -> Option<ValueEvent> {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event.clone());
        Some(event)
    }

    fn persistent(&self) -> bool {
        true
    }

    fn replay(&self, _last: Option<&ValueEvent>) -> Vec<ValueEvent> {
        self.events.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passes_through() {
        let mut buffer = Buffer::new(2);
        let out = buffer.process(ValueEvent::from_number(1.0)).unwrap();

        assert_eq!(out.numeric_value().unwrap(), 1.0);
    }

    #[test]
    fn test_keeps_last_n() {
        let mut buffer = Buffer::new(3);
        for v in 1..=5 {
            buffer.process(ValueEvent::from_number(v as f64));
        }

        let history: Vec<f64> = buffer
            .replay(None)
            .iter()
            .map(|e| e.numeric_value().unwrap())
            .collect();
        assert_eq!(history, vec![3.0, 4.0, 5.0]);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        assert_eq!(Buffer::new(0).capacity(), 1);
    }
}
