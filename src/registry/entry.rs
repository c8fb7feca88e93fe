//! Subscription snapshots

use crate::dist::{Distributor, NodeState};
use crate::stats::NodeStats;

/// Point-in-time view of one registered subscription
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    /// Canonical key
    pub key: String,
    /// Stage name (`client` for the driver-fed node)
    pub stage: &'static str,
    /// Node state
    pub state: NodeState,
    /// Attached sinks
    pub sinks: usize,
    /// Requests waiting for the upstream
    pub pending: usize,
    /// Whether the node survives having no sinks
    pub persistent: bool,
    /// Node counters
    pub stats: NodeStats,
}

impl SubscriptionInfo {
    pub(super) fn from_node(node: &Distributor) -> Self {
        Self {
            key: node.key(),
            stage: node.stage_name(),
            state: node.state(),
            sinks: node.sink_count(),
            pending: node.pending_count(),
            persistent: node.is_persistent(),
            stats: node.stats(),
        }
    }

    /// Whether the node has anyone to deliver to
    pub fn is_idle(&self) -> bool {
        self.sinks == 0 && self.pending == 0
    }
}
