//! Driver event publisher
//!
//! The sending half of a driver connection. Client libraries usually invoke
//! their callbacks on their own threads; a [`DriverPublisher`] is `Send` and
//! `Clone`, so those callbacks can push straight onto the loop thread.

use tokio::sync::mpsc;

use crate::event::ValueEvent;

/// Events a driver reports for one physical source
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// Source reachable; sent on first connect and after every recovery
    Connected,

    /// New value from the source
    Value(ValueEvent),

    /// Source unreachable for now; the driver keeps trying
    Disconnected(String),

    /// Source gone for good
    Failed(String),
}

/// Pushes driver events into a connection
///
/// # Example
/// ```
/// use pvbroker::device::{DriverConnection, DriverEvent};
/// use pvbroker::event::ValueEvent;
///
/// let (publisher, mut connection) = DriverConnection::channel("ring:current");
///
/// std::thread::spawn(move || {
///     publisher.connected();
///     publisher.value(ValueEvent::from_number(401.7));
/// })
/// .join()
/// .unwrap();
///
/// assert_eq!(connection.try_next(), Some(DriverEvent::Connected));
/// ```
#[derive(Debug, Clone)]
pub struct DriverPublisher {
    name: String,
    event_tx: mpsc::UnboundedSender<DriverEvent>,
}

impl DriverPublisher {
    pub(crate) fn new(name: String, event_tx: mpsc::UnboundedSender<DriverEvent>) -> Self {
        Self { name, event_tx }
    }

    /// Name of the source this publisher feeds
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a raw event; returns false once the broker side has gone away
    pub fn send(&self, event: DriverEvent) -> bool {
        self.event_tx.send(event).is_ok()
    }

    pub fn connected(&self) -> bool {
        self.send(DriverEvent::Connected)
    }

    pub fn value(&self, event: ValueEvent) -> bool {
        self.send(DriverEvent::Value(event))
    }

    pub fn disconnected(&self, reason: impl Into<String>) -> bool {
        self.send(DriverEvent::Disconnected(reason.into()))
    }

    pub fn failed(&self, reason: impl Into<String>) -> bool {
        self.send(DriverEvent::Failed(reason.into()))
    }

    /// Whether the broker released the connection
    ///
    /// Drivers should stop monitoring the source once this is true.
    pub fn is_closed(&self) -> bool {
        self.event_tx.is_closed()
    }

    /// Wait until the broker releases the connection
    pub async fn closed(&self) {
        self.event_tx.closed().await
    }
}
