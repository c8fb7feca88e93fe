//! Sink and transport contracts

use std::fmt;
use std::rc::Rc;

use crate::event::ValueEvent;

/// Why a sink or node lost its connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Clean detach
    Closed,
    /// Upstream dropped but may come back; the node stays up
    Lost(String),
    /// Upstream failed for good; the node tears down
    Failed(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Closed => write!(f, "connection closed"),
            DisconnectReason::Lost(reason) => write!(f, "connection lost: {}", reason),
            DisconnectReason::Failed(reason) => write!(f, "connection failed: {}", reason),
        }
    }
}

/// Handle a sink uses to detach from whatever feeds it
pub trait Transport {
    /// Detach; the feeding side stops delivering
    fn lose_connection(&self);

    /// Human-readable description of the feeding side
    fn peer(&self) -> String {
        String::new()
    }
}

/// Downstream consumer of value events
pub trait Sink {
    /// Called once, before any data, with the handle used to detach
    fn make_connection(&mut self, transport: Rc<dyn Transport>) {
        let _ = transport;
    }

    /// One event, in upstream order
    fn data_received(&mut self, event: &ValueEvent);

    /// The sink has been detached
    fn connection_lost(&mut self, reason: &DisconnectReason) {
        let _ = reason;
    }
}

/// Builds sinks on demand
///
/// `address` is the subscription key of the node the sink attaches to.
pub trait SinkFactory {
    fn build_sink(&self, address: &str) -> Box<dyn Sink>;

    /// The request this factory was queued for will never be served
    fn request_failed(&self, reason: &DisconnectReason) {
        let _ = reason;
    }
}

impl<F> SinkFactory for F
where
    F: Fn(&str) -> Box<dyn Sink>,
{
    fn build_sink(&self, address: &str) -> Box<dyn Sink> {
        self(address)
    }
}
