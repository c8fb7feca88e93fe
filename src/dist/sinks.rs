//! Owning sink arena
//!
//! Sinks are kept in attachment order under monotonically increasing ids.
//! The arena is the only place a node counts its consumers.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use super::sink::Sink;

/// Identifier of an attached sink, unique within its node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SinkId(u64);

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) type SharedSink = Rc<RefCell<Box<dyn Sink>>>;

#[derive(Default)]
pub(crate) struct SinkSet {
    next_id: u64,
    sinks: BTreeMap<SinkId, SharedSink>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the id the next attached sink will use
    pub fn next_id(&mut self) -> SinkId {
        self.next_id += 1;
        SinkId(self.next_id)
    }

    pub fn insert(&mut self, id: SinkId, sink: Box<dyn Sink>) -> SharedSink {
        let sink = Rc::new(RefCell::new(sink));
        self.sinks.insert(id, Rc::clone(&sink));
        sink
    }

    pub fn remove(&mut self, id: SinkId) -> Option<SharedSink> {
        self.sinks.remove(&id)
    }

    pub fn contains(&self, id: SinkId) -> bool {
        self.sinks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Copy of the current membership, in attachment order
    pub fn snapshot(&self) -> Vec<(SinkId, SharedSink)> {
        self.sinks
            .iter()
            .map(|(id, sink)| (*id, Rc::clone(sink)))
            .collect()
    }

    /// Remove every sink, returning them in attachment order
    pub fn drain(&mut self) -> Vec<(SinkId, SharedSink)> {
        std::mem::take(&mut self.sinks).into_iter().collect()
    }
}
