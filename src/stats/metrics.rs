//! Statistics for distribution nodes, the subscription registry and
//! front-end sessions

use std::time::{Duration, Instant};

/// Per-node statistics
#[derive(Debug, Clone)]
pub struct NodeStats {
    /// When the node was created
    pub created_at: Instant,
    /// Events handed to the node by its upstream
    pub events_received: u64,
    /// Events delivered to sinks (including replays and ticks)
    pub events_emitted: u64,
    /// Events the stage swallowed
    pub events_dropped: u64,
    /// Sinks ever attached
    pub sinks_attached: u64,
    /// Sinks detached through `remove_sink`
    pub sinks_removed: u64,
    /// Requests cancelled before they could attach
    pub requests_cancelled: u64,
}

impl NodeStats {
    pub fn new() -> Self {
        Self {
            created_at: Instant::now(),
            events_received: 0,
            events_emitted: 0,
            events_dropped: 0,
            sinks_attached: 0,
            sinks_removed: 0,
            requests_cancelled: 0,
        }
    }

    /// Time since the node was created
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Fraction of received events the stage dropped
    pub fn drop_ratio(&self) -> f64 {
        if self.events_received > 0 {
            self.events_dropped as f64 / self.events_received as f64
        } else {
            0.0
        }
    }
}

impl Default for NodeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry-wide snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Live subscriptions
    pub subscriptions: usize,
    /// Sinks attached across all nodes
    pub sinks: usize,
    /// Requests still waiting for an upstream
    pub pending: usize,
    /// Subscriptions exempt from zero-sink teardown
    pub persistent: usize,
}

/// Per-connection front-end counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Request lines read
    pub requests: u64,
    /// Request lines that failed to parse
    pub rejected: u64,
    /// Reply lines written (data and errors)
    pub lines_sent: u64,
    /// Total bytes written
    pub bytes_sent: u64,
    /// Total bytes read
    pub bytes_received: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one written line of `len` bytes, newline excluded
    pub fn record_line(&mut self, len: usize) {
        self.lines_sent += 1;
        self.bytes_sent += len as u64 + 1;
    }
}
