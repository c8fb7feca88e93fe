//! Connection context
//!
//! Identity and counters for one front-end connection.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::stats::SessionStats;

#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Unique session ID
    pub session_id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Connection start time
    pub connected_at: Instant,

    /// Current session statistics
    pub stats: SessionStats,
}

impl SessionContext {
    pub fn new(session_id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            session_id,
            peer_addr,
            connected_at: Instant::now(),
            stats: SessionStats::default(),
        }
    }

    /// Time since the connection was accepted
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
