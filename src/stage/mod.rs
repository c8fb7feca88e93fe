//! Pipeline stages
//!
//! A [`Stage`] is the hook a distribution node runs on every upstream event.
//! It may pass the event on (possibly rewritten), drop it, or hold it for a
//! later tick. Stages never see sinks and never touch the registry.

pub mod buffer;
pub mod filter;
pub mod rate;
pub mod transform;

use std::time::Duration;

use crate::event::ValueEvent;

pub use buffer::Buffer;
pub use filter::{HighEdge, LowEdge, Threshold};
pub use rate::{Rate, RateLimit};
pub use transform::{Offset, Scale, SetAttribute, SetPrecision};

/// Per-node event hook
pub trait Stage {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Handle one upstream event; `None` emits nothing
    fn process(&mut self, event: ValueEvent) -> Option<ValueEvent>;

    /// Period of the node's ticker, started with the first event
    fn tick_interval(&self) -> Option<Duration> {
        None
    }

    /// Called on every tick
    fn on_tick(&mut self) -> Option<ValueEvent> {
        None
    }

    /// Whether the node stays up with no sinks
    fn persistent(&self) -> bool {
        false
    }

    /// Events a newly attached sink receives, oldest first
    fn replay(&self, last: Option<&ValueEvent>) -> Vec<ValueEvent> {
        last.cloned().into_iter().collect()
    }
}

/// Read the numeric value a stage needs, logging and dropping otherwise
pub(crate) fn numeric(stage: &'static str, event: &ValueEvent) -> Option<f64> {
    match event.numeric_value() {
        Ok(v) => Some(v),
        Err(err) => {
            tracing::warn!(stage = stage, error = %err, "Dropping non-numeric event");
            None
        }
    }
}

/// Hook of the node fed straight from a driver
#[derive(Debug, Default)]
pub struct Passthrough;

impl Stage for Passthrough {
    fn name(&self) -> &'static str {
        "client"
    }

    fn process(&mut self, event: ValueEvent) -> Option<ValueEvent> {
        Some(event)
    }
}

/// Declarative description of a stage
#[derive(Debug, Clone, PartialEq)]
pub enum StageSpec {
    Passthrough,
    Buffer(usize),
    Rate(Duration),
    RateLimit(Duration),
    LowEdge(f64),
    HighEdge(f64),
    Threshold(f64),
    Scale(f64),
    Offset(f64),
    Name(String),
    Units(String),
    Precision(u32),
}

impl StageSpec {
    /// Construct the stage hook
    pub fn build(&self) -> Box<dyn Stage> {
        match self {
            StageSpec::Passthrough => Box::new(Passthrough),
            StageSpec::Buffer(size) => Box::new(Buffer::new(*size)),
            StageSpec::Rate(period) => Box::new(Rate::new(*period)),
            StageSpec::RateLimit(period) => Box::new(RateLimit::new(*period)),
            StageSpec::LowEdge(v) => Box::new(LowEdge::new(*v)),
            StageSpec::HighEdge(v) => Box::new(HighEdge::new(*v)),
            StageSpec::Threshold(v) => Box::new(Threshold::new(*v)),
            StageSpec::Scale(k) => Box::new(Scale::new(*k)),
            StageSpec::Offset(d) => Box::new(Offset::new(*d)),
            StageSpec::Name(name) => Box::new(SetAttribute::new(crate::event::NAME, name)),
            StageSpec::Units(units) => Box::new(SetAttribute::new(crate::event::UNITS, units)),
            StageSpec::Precision(p) => Box::new(SetPrecision::new(*p)),
        }
    }
}
