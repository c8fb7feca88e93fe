//! Driver adapter
//!
//! A [`Driver`] opens one [`DriverConnection`] per physical source. The
//! connection is the receiving half of an unbounded channel; the driver
//! keeps the [`DriverPublisher`] and pushes events from wherever its client
//! library calls back. A pump task spawned on the loop thread replays those
//! events into the source's distribution node.
//!
//! ```text
//!   client library thread          loop thread
//!   ─────────────────────          ─────────────────────────────────
//!   DriverPublisher ──► mpsc ──►  pump ──► Distributor::on_upstream_*
//!                                   ▲
//!                                   └── DriverTransport::lose_connection
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use super::publisher::{DriverEvent, DriverPublisher};
use crate::dist::{DisconnectReason, Distributor, Transport, WeakDistributor};

/// Backend that can monitor named sources
pub trait Driver {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Start monitoring `source`
    ///
    /// The returned connection must eventually yield `Connected` (or a
    /// value) once the source is reachable, or `Failed` if it never will be.
    fn connect(&self, source: &str) -> DriverConnection;
}

/// Receiving half of a driver's event channel for one source
#[derive(Debug)]
pub struct DriverConnection {
    name: String,
    event_rx: mpsc::UnboundedReceiver<DriverEvent>,
}

impl DriverConnection {
    /// Create a connected publisher/connection pair for `name`
    pub fn channel(name: impl Into<String>) -> (DriverPublisher, DriverConnection) {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let publisher = DriverPublisher::new(name.clone(), tx);
        (publisher, DriverConnection { name, event_rx: rx })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next event; `None` once every publisher is gone
    pub async fn next(&mut self) -> Option<DriverEvent> {
        self.event_rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_next(&mut self) -> Option<DriverEvent> {
        self.event_rx.try_recv().ok()
    }
}

/// Driver whose sources are fed by hand
///
/// Every `connect` hands out a fresh channel and keeps its publisher, so an
/// embedding application (or a test) can drive the source directly.
#[derive(Debug, Default)]
pub struct ManualDriver {
    publishers: RefCell<Vec<DriverPublisher>>,
}

impl ManualDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections opened so far
    pub fn connects(&self) -> usize {
        self.publishers.borrow().len()
    }

    /// Publisher of the most recent connection to `source`
    pub fn publisher(&self, source: &str) -> Option<DriverPublisher> {
        self.publishers
            .borrow()
            .iter()
            .rev()
            .find(|p| p.name() == source)
            .cloned()
    }

    /// Publishers whose connection is still held by the broker
    pub fn open(&self) -> Vec<DriverPublisher> {
        self.publishers
            .borrow()
            .iter()
            .filter(|p| !p.is_closed())
            .cloned()
            .collect()
    }
}

impl Driver for ManualDriver {
    fn name(&self) -> &str {
        "manual"
    }

    fn connect(&self, source: &str) -> DriverConnection {
        let (publisher, connection) = DriverConnection::channel(source);
        self.publishers.borrow_mut().push(publisher);
        connection
    }
}

/// Upstream handle given to the node fed by a pump
struct DriverTransport {
    source: String,
    stop: Rc<Notify>,
}

impl Transport for DriverTransport {
    fn lose_connection(&self) {
        self.stop.notify_one();
    }

    fn peer(&self) -> String {
        format!("driver:{}", self.source)
    }
}

struct Pump {
    node: WeakDistributor,
    transport: Rc<dyn Transport>,
    attached: bool,
    link_up: bool,
}

impl Pump {
    fn attach(&mut self, node: &Distributor) {
        if !self.attached {
            self.attached = true;
            node.on_upstream_connect(Rc::clone(&self.transport));
        }
    }

    /// Returns false once the connection is finished
    fn handle(&mut self, node: &Distributor, event: DriverEvent) -> bool {
        match event {
            DriverEvent::Connected => {
                self.link_up = true;
                if self.attached {
                    tracing::debug!(key = %node.key(), "Driver reconnected");
                    node.on_upstream_restored();
                } else {
                    self.attach(node);
                }
            }
            DriverEvent::Value(mut event) => {
                if !self.attached {
                    self.link_up = true;
                    self.attach(node);
                }
                event.set_connected(self.link_up);
                node.on_upstream_value(event);
            }
            DriverEvent::Disconnected(reason) => {
                self.link_up = false;
                if self.attached {
                    node.on_upstream_disconnect(DisconnectReason::Lost(reason));
                } else {
                    tracing::debug!(key = %node.key(), reason = %reason, "Driver not connected yet");
                }
            }
            DriverEvent::Failed(reason) => {
                node.on_upstream_disconnect(DisconnectReason::Failed(reason));
                return false;
            }
        }
        true
    }
}

/// Replay `connection` into `node` until either side goes away
///
/// Must be called from within a `LocalSet`.
pub(crate) fn spawn_pump(node: &Distributor, mut connection: DriverConnection) -> JoinHandle<()> {
    let stop = Rc::new(Notify::new());
    {
        // The node can go down before the driver ever connects
        let stop = Rc::clone(&stop);
        node.on_teardown(move || stop.notify_one());
    }
    let transport: Rc<dyn Transport> = Rc::new(DriverTransport {
        source: connection.name().to_string(),
        stop: Rc::clone(&stop),
    });
    let mut pump = Pump {
        node: node.downgrade(),
        transport,
        attached: false,
        link_up: false,
    };

    tokio::task::spawn_local(async move {
        loop {
            let event = tokio::select! {
                _ = stop.notified() => break,
                event = connection.next() => event,
            };

            let Some(node) = pump.node.upgrade() else {
                break;
            };

            match event {
                Some(event) => {
                    if !pump.handle(&node, event) {
                        break;
                    }
                }
                None => {
                    node.on_upstream_disconnect(DisconnectReason::Failed(
                        "driver closed the connection".into(),
                    ));
                    break;
                }
            }
        }

        tracing::debug!(source = %connection.name(), "Driver connection closed");
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::task::LocalSet;

    use super::*;
    use crate::dist::NodeState;
    use crate::error::SubscribeError;
    use crate::event::ValueEvent;
    use crate::stage::StageSpec;
    use crate::testing::Recorder;

    fn client(driver: &ManualDriver, source: &str) -> Distributor {
        let node = Distributor::new(format!("epics:{}", source), StageSpec::Passthrough.build());
        spawn_pump(&node, driver.connect(source));
        node
    }

    /// Let every ready task run
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_then_values() {
        LocalSet::new()
            .run_until(async {
                let driver = ManualDriver::new();
                let node = client(&driver, "pv");
                let rec = Recorder::new();
                let pending = node.add_sink(rec.factory());

                let publisher = driver.publisher("pv").unwrap();
                publisher.connected();
                publisher.value(ValueEvent::from_number(1.5));
                settle().await;

                let handle = pending.await.unwrap();
                assert_eq!(handle.key(), "epics:pv");
                assert_eq!(rec.connected(), vec!["epics:pv".to_string()]);
                assert_eq!(rec.values(), vec![1.5]);
                assert_eq!(rec.events()[0].connected(), Some(true));
                assert_eq!(node.state(), NodeState::Flowing);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_implies_connect() {
        LocalSet::new()
            .run_until(async {
                let driver = ManualDriver::new();
                let node = client(&driver, "pv");
                let rec = Recorder::new();
                let pending = node.add_sink(rec.factory());

                driver.publisher("pv").unwrap().value(ValueEvent::from_number(3.0));
                settle().await;

                pending.await.unwrap();
                assert_eq!(rec.values(), vec![3.0]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_loss_and_recovery() {
        LocalSet::new()
            .run_until(async {
                let driver = ManualDriver::new();
                let node = client(&driver, "pv");
                let rec = Recorder::new();
                let pending = node.add_sink(rec.factory());

                let publisher = driver.publisher("pv").unwrap();
                publisher.connected();
                publisher.value(ValueEvent::from_number(2.0));
                publisher.disconnected("ioc rebooting");
                settle().await;
                pending.await.unwrap();

                publisher.connected();
                settle().await;

                let flags: Vec<_> = rec.events().iter().map(|e| e.connected()).collect();
                assert_eq!(flags, vec![Some(true), Some(false), Some(true)]);
                assert_eq!(rec.values(), vec![2.0, 2.0, 2.0]);
                assert!(rec.lost().is_empty());
                assert!(!publisher.is_closed());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_rejects_pending() {
        LocalSet::new()
            .run_until(async {
                let driver = ManualDriver::new();
                let node = client(&driver, "pv");
                let rec = Recorder::new();
                let pending = node.add_sink(rec.factory());

                let publisher = driver.publisher("pv").unwrap();
                publisher.failed("no such channel");
                settle().await;

                assert_eq!(
                    pending.await.err(),
                    Some(SubscribeError::UpstreamConnect("no such channel".into()))
                );
                assert_eq!(node.state(), NodeState::Disconnected);
                assert!(publisher.is_closed());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_closes_driver_side() {
        LocalSet::new()
            .run_until(async {
                let driver = ManualDriver::new();
                let node = client(&driver, "pv");
                let rec = Recorder::new();
                let pending = node.add_sink(rec.factory());

                let publisher = driver.publisher("pv").unwrap();
                publisher.connected();
                settle().await;

                let handle = pending.await.unwrap();
                assert!(handle.close());
                settle().await;

                assert!(publisher.is_closed());
                assert!(driver.open().is_empty());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_while_connecting_closes_driver_side() {
        LocalSet::new()
            .run_until(async {
                let driver = ManualDriver::new();
                let node = client(&driver, "pv");
                let rec = Recorder::new();
                let pending = node.add_sink(rec.factory());
                let publisher = driver.publisher("pv").unwrap();

                node.release();
                settle().await;

                assert!(matches!(pending.await, Err(SubscribeError::Closed(_))));
                assert!(publisher.is_closed());
                assert!(driver.open().is_empty());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_hangup_fails_node() {
        LocalSet::new()
            .run_until(async {
                let node = Distributor::new("epics:pv", StageSpec::Passthrough.build());
                let (publisher, connection) = DriverConnection::channel("pv");
                spawn_pump(&node, connection);
                let rec = Recorder::new();
                let pending = node.add_sink(rec.factory());

                drop(publisher);
                settle().await;

                assert!(matches!(
                    pending.await,
                    Err(SubscribeError::UpstreamConnect(_))
                ));
            })
            .await;
    }

    #[test]
    fn test_manual_driver_bookkeeping() {
        let driver = ManualDriver::new();
        let _a = driver.connect("a");
        let b = driver.connect("b");
        let _a2 = driver.connect("a");

        assert_eq!(driver.connects(), 3);
        assert_eq!(driver.publisher("b").unwrap().name(), "b");
        assert!(driver.publisher("c").is_none());

        drop(b);
        assert_eq!(driver.open().len(), 2);
    }
}
