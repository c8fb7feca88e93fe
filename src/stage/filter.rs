//! Edge and level-crossing filters
//!
//! All three track the boolean state of a comparison against a fixed value
//! and emit only when that state changes. Non-numeric events are dropped and
//! do not touch the state.

use super::{numeric, Stage};
use crate::event::ValueEvent;

/// Emits on the transition into `value <= limit`
#[derive(Debug)]
pub struct LowEdge {
    limit: f64,
    below: bool,
}

impl LowEdge {
    pub fn new(limit: f64) -> Self {
        Self {
            limit,
            below: false,
        }
    }
}

impl Stage for LowEdge {
    fn name(&self) -> &'static str {
        "lowedge"
    }

    fn process(&mut self, event: ValueEvent) -> Option<ValueEvent> {
        let v = numeric(self.name(), &event)?;
        let below = v <= self.limit;
        let fire = below && !self.below;
        self.below = below;
        fire.then_some(event)
    }
}

/// Emits on the transition into `value >= limit`
#[derive(Debug)]
pub struct HighEdge {
    limit: f64,
    above: bool,
}

impl HighEdge {
    pub fn new(limit: f64) -> Self {
        Self {
            limit,
            above: false,
        }
    }
}

impl Stage for HighEdge {
    fn name(&self) -> &'static str {
        "highedge"
    }

    fn process(&mut self, event: ValueEvent) -> Option<ValueEvent> {
        let v = numeric(self.name(), &event)?;
        let above = v >= self.limit;
        let fire = above && !self.above;
        self.above = above;
        fire.then_some(event)
    }
}

/// Emits whenever `value <= limit` flips, in either direction
///
/// The first numeric event always goes out.
#[derive(Debug)]
pub struct Threshold {
    limit: f64,
    below: Option<bool>,
}

impl Threshold {
    pub fn new(limit: f64) -> Self {
        Self { limit, below: None }
    }
}

impl Stage for Threshold {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn process(&mut self, event: ValueEvent) -> Option<ValueEvent> {
        let v = numeric(self.name(), &event)?;
        let below = v <= self.limit;
        let fire = self.below != Some(below);
        self.below = Some(below);
        fire.then_some(event)
    }
}
