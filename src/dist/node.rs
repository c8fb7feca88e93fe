//! Distribution node
//!
//! One upstream, many sinks. The node owns its sink arena, its queue of
//! requests waiting for an upstream, the last value it emitted, and the
//! [`Stage`] hook that shapes what it emits.
//!
//! All state sits behind one `RefCell` and no borrow is held while user code
//! (sink callbacks, factories, teardown hooks) runs, so callbacks may freely
//! add or remove sinks on the node that is calling them.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::pending::{PendingRequest, PendingSink};
use super::sink::{DisconnectReason, Sink, SinkFactory, Transport};
use super::sinks::{SinkId, SinkSet};
use crate::error::SubscribeError;
use crate::event::ValueEvent;
use crate::stage::Stage;
use crate::stats::NodeStats;

/// Lifecycle of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Created, nothing asked for an upstream yet
    Unattached,
    /// Upstream requested, not connected
    Connecting,
    /// Upstream connected, nothing emitted yet
    Connected,
    /// At least one event emitted
    Flowing,
    /// Released or failed; terminal
    Disconnected,
}

struct NodeInner {
    key: String,
    state: NodeState,
    stage: Box<dyn Stage>,
    sinks: SinkSet,
    attaching: BTreeSet<SinkId>,
    pending: VecDeque<PendingRequest>,
    last: Option<ValueEvent>,
    upstream: Option<Rc<dyn Transport>>,
    teardown: Vec<Box<dyn FnOnce()>>,
    ticker: Option<JoinHandle<()>>,
    failure: Option<String>,
    stats: NodeStats,
}

/// Shared handle to a distribution node
#[derive(Clone)]
pub struct Distributor {
    inner: Rc<RefCell<NodeInner>>,
}

impl Distributor {
    /// Create an unattached node
    pub fn new(key: impl Into<String>, stage: Box<dyn Stage>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(NodeInner {
                key: key.into(),
                state: NodeState::Unattached,
                stage,
                sinks: SinkSet::new(),
                attaching: BTreeSet::new(),
                pending: VecDeque::new(),
                last: None,
                upstream: None,
                teardown: Vec::new(),
                ticker: None,
                failure: None,
                stats: NodeStats::new(),
            })),
        }
    }

    /// Subscription key
    pub fn key(&self) -> String {
        self.inner.borrow().key.clone()
    }

    pub fn state(&self) -> NodeState {
        self.inner.borrow().state
    }

    /// Name of the stage hook
    pub fn stage_name(&self) -> &'static str {
        self.inner.borrow().stage.name()
    }

    /// Whether the node survives having no sinks
    pub fn is_persistent(&self) -> bool {
        self.inner.borrow().stage.persistent()
    }

    pub fn sink_count(&self) -> usize {
        self.inner.borrow().sinks.len()
    }

    pub fn has_sink(&self, id: SinkId) -> bool {
        self.inner.borrow().sinks.contains(id)
    }

    /// Requests still waiting for the upstream
    pub fn pending_count(&self) -> usize {
        self.inner
            .borrow()
            .pending
            .iter()
            .filter(|r| r.is_open())
            .count()
    }

    /// Last emitted event
    pub fn last_value(&self) -> Option<ValueEvent> {
        self.inner.borrow().last.clone()
    }

    /// Events a newly attached sink would receive right away
    pub fn history(&self) -> Vec<ValueEvent> {
        let inner = self.inner.borrow();
        inner.stage.replay(inner.last.as_ref())
    }

    pub fn stats(&self) -> NodeStats {
        self.inner.borrow().stats.clone()
    }

    /// Whether both handles address the same node
    pub fn ptr_eq(&self, other: &Distributor) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Non-owning handle
    pub fn downgrade(&self) -> WeakDistributor {
        WeakDistributor {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Run `hook` once when the node goes down
    pub(crate) fn on_teardown(&self, hook: impl FnOnce() + 'static) {
        self.inner.borrow_mut().teardown.push(Box::new(hook));
    }

    /// Note that an upstream has been requested
    pub(crate) fn mark_connecting(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.state == NodeState::Unattached {
            inner.state = NodeState::Connecting;
        }
    }

    /// Ask for a sink to be attached
    ///
    /// Before the upstream connects the request is queued; afterwards the
    /// sink is built and attached immediately, receives the node's history,
    /// and the returned future is already resolved.
    pub fn add_sink(&self, factory: Rc<dyn SinkFactory>) -> PendingSink {
        let (state, has_upstream, key, failure) = {
            let inner = self.inner.borrow();
            (
                inner.state,
                inner.upstream.is_some(),
                inner.key.clone(),
                inner.failure.clone(),
            )
        };

        let (pending, request) = PendingSink::new(&key, factory);

        if state == NodeState::Disconnected {
            request.reject(match failure {
                Some(cause) => SubscribeError::UpstreamConnect(cause),
                None => SubscribeError::Closed(key),
            });
        } else if has_upstream {
            self.attach(request);
        } else {
            let node = self.downgrade();
            request.on_cancel(move || {
                if let Some(node) = node.upgrade() {
                    node.release_if_abandoned();
                }
            });

            let mut inner = self.inner.borrow_mut();
            inner.pending.push_back(request);
            tracing::trace!(key = %key, queued = inner.pending.len(), "Sink request queued");
        }

        pending
    }

    /// Build, connect and register the sink for one request
    fn attach(&self, request: PendingRequest) -> bool {
        if !request.is_open() {
            return false;
        }

        let (id, key) = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.sinks.next_id();
            inner.attaching.insert(id);
            (id, inner.key.clone())
        };

        let handle = SinkHandle {
            node: Rc::downgrade(&self.inner),
            id,
            key: key.clone(),
        };

        let mut sink = request.factory().build_sink(&key);
        sink.make_connection(Rc::new(handle.clone()));

        let attached = {
            let mut inner = self.inner.borrow_mut();
            let closed_early = !inner.attaching.remove(&id);
            if closed_early || inner.state == NodeState::Disconnected {
                Err(sink)
            } else {
                let shared = inner.sinks.insert(id, sink);
                inner.stats.sinks_attached += 1;
                let history = inner.stage.replay(inner.last.as_ref());
                Ok((shared, history, inner.sinks.len()))
            }
        };

        let (shared, history, sinks) = match attached {
            Ok(attached) => attached,
            Err(mut sink) => {
                sink.connection_lost(&DisconnectReason::Closed);
                request.reject(SubscribeError::Closed(key));
                self.release_if_idle();
                return false;
            }
        };

        tracing::debug!(
            key = %key,
            sink = %id,
            sinks = sinks,
            replayed = history.len(),
            "Sink attached"
        );

        for event in &history {
            if !self.has_sink(id) {
                break;
            }
            if let Ok(mut sink) = shared.try_borrow_mut() {
                sink.data_received(event);
            }
        }

        request.resolve(handle);
        true
    }

    /// Detach a sink
    ///
    /// The sink gets `connection_lost(Closed)` unless it is the one calling.
    /// A non-persistent node left without sinks releases itself.
    pub fn remove_sink(&self, id: SinkId) -> bool {
        let (removed, key, remaining) = {
            let mut inner = self.inner.borrow_mut();
            let removed = inner.sinks.remove(id);
            if removed.is_some() {
                inner.stats.sinks_removed += 1;
            } else {
                inner.attaching.remove(&id);
            }
            (removed, inner.key.clone(), inner.sinks.len())
        };

        let Some(sink) = removed else {
            return false;
        };

        tracing::debug!(key = %key, sink = %id, sinks = remaining, "Sink removed");

        if let Ok(mut sink) = sink.try_borrow_mut() {
            sink.connection_lost(&DisconnectReason::Closed);
        }

        self.release_if_idle();
        true
    }

    /// Upstream transport is ready; attach every queued request in order
    pub fn on_upstream_connect(&self, transport: Rc<dyn Transport>) {
        let requests = {
            let mut inner = self.inner.borrow_mut();
            if inner.state == NodeState::Disconnected {
                None
            } else {
                inner.upstream = Some(Rc::clone(&transport));
                if matches!(inner.state, NodeState::Unattached | NodeState::Connecting) {
                    inner.state = NodeState::Connected;
                }
                Some((std::mem::take(&mut inner.pending), inner.key.clone()))
            }
        };

        let Some((requests, key)) = requests else {
            transport.lose_connection();
            return;
        };

        tracing::info!(
            key = %key,
            upstream = %transport.peer(),
            queued = requests.len(),
            "Upstream connected"
        );

        let queued = requests.len();
        let mut attached = 0;
        for request in requests {
            if self.attach(request) {
                attached += 1;
            }
        }

        if queued > 0 && attached == 0 {
            self.release_if_idle();
        }
    }

    /// Feed one upstream event through the stage
    pub fn on_upstream_value(&self, event: ValueEvent) {
        let (output, ticker) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state == NodeState::Disconnected {
                return;
            }
            inner.stats.events_received += 1;

            let output = inner.stage.process(event);
            if output.is_none() {
                inner.stats.events_dropped += 1;
            }

            let ticker = match inner.ticker {
                Some(_) => None,
                None => inner.stage.tick_interval(),
            };
            (output, ticker)
        };

        if let Some(period) = ticker {
            self.start_ticker(period);
        }
        if let Some(event) = output {
            self.emit(event);
        }
    }

    /// Upstream came back after a transient loss
    pub fn on_upstream_restored(&self) {
        let last = {
            let inner = self.inner.borrow();
            if inner.state == NodeState::Disconnected {
                return;
            }
            inner.last.clone()
        };

        if let Some(mut event) = last.filter(|e| e.connected() == Some(false)) {
            event.set_connected(true);
            self.emit(event);
        }
    }

    /// Upstream went away
    ///
    /// `Lost` re-emits the last value flagged `connected = false` and keeps
    /// the node up. `Closed` and `Failed` tear it down.
    pub fn on_upstream_disconnect(&self, reason: DisconnectReason) {
        match reason {
            DisconnectReason::Lost(ref cause) => {
                let (last, key) = {
                    let inner = self.inner.borrow();
                    if inner.state == NodeState::Disconnected {
                        return;
                    }
                    (inner.last.clone(), inner.key.clone())
                };

                tracing::warn!(key = %key, reason = %cause, "Upstream lost");

                if let Some(mut event) = last {
                    event.set_connected(false);
                    self.emit(event);
                }
            }
            other => self.shutdown(other),
        }
    }

    /// Tear the node down, detaching every sink
    pub fn release(&self) {
        self.shutdown(DisconnectReason::Closed);
    }

    /// Release a node still waiting for its upstream once nobody waits on it
    fn release_if_abandoned(&self) {
        let waiting = {
            let mut inner = self.inner.borrow_mut();
            inner.stats.requests_cancelled += 1;
            matches!(inner.state, NodeState::Unattached | NodeState::Connecting)
        };
        if waiting {
            self.release_if_idle();
        }
    }

    fn release_if_idle(&self) {
        let idle = {
            let inner = self.inner.borrow();
            inner.state != NodeState::Disconnected
                && inner.sinks.is_empty()
                && inner.attaching.is_empty()
                && !inner.pending.iter().any(PendingRequest::is_open)
                && !inner.stage.persistent()
        };
        if idle {
            self.release();
        }
    }

    fn shutdown(&self, reason: DisconnectReason) {
        let (key, pending, sinks, hooks, ticker, upstream) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state == NodeState::Disconnected {
                return;
            }
            inner.state = NodeState::Disconnected;
            if let DisconnectReason::Failed(ref cause) = reason {
                inner.failure = Some(cause.clone());
            }
            (
                inner.key.clone(),
                std::mem::take(&mut inner.pending),
                inner.sinks.drain(),
                std::mem::take(&mut inner.teardown),
                inner.ticker.take(),
                inner.upstream.take(),
            )
        };

        if let Some(ticker) = ticker {
            ticker.abort();
        }

        match reason {
            DisconnectReason::Failed(ref cause) => tracing::warn!(
                key = %key,
                reason = %cause,
                sinks = sinks.len(),
                pending = pending.len(),
                "Subscription failed"
            ),
            _ => tracing::info!(key = %key, sinks = sinks.len(), "Subscription released"),
        }

        for hook in hooks {
            hook();
        }

        let err = match reason {
            DisconnectReason::Failed(ref cause) => SubscribeError::UpstreamConnect(cause.clone()),
            _ => SubscribeError::Closed(key),
        };
        for request in pending {
            let factory = Rc::clone(request.factory());
            if request.reject(err.clone()) {
                factory.request_failed(&reason);
            }
        }

        for (_, sink) in sinks {
            if let Ok(mut sink) = sink.try_borrow_mut() {
                sink.connection_lost(&reason);
            }
        }

        if let Some(upstream) = upstream {
            upstream.lose_connection();
        }
    }

    fn emit(&self, event: ValueEvent) {
        let targets = {
            let mut inner = self.inner.borrow_mut();
            if inner.state == NodeState::Connected {
                inner.state = NodeState::Flowing;
            }
            inner.last = Some(event.clone());
            inner.stats.events_emitted += 1;
            inner.sinks.snapshot()
        };

        for (id, sink) in targets {
            if !self.has_sink(id) {
                continue;
            }
            if let Ok(mut sink) = sink.try_borrow_mut() {
                sink.data_received(&event);
            }
        }
    }

    fn on_tick(&self) {
        let output = {
            let mut inner = self.inner.borrow_mut();
            if inner.state == NodeState::Disconnected {
                return;
            }
            inner.stage.on_tick()
        };
        if let Some(event) = output {
            self.emit(event);
        }
    }

    fn start_ticker(&self, period: Duration) {
        let node = Rc::downgrade(&self.inner);
        let ticker = tokio::task::spawn_local(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match node.upgrade() {
                    Some(inner) => Distributor { inner }.on_tick(),
                    None => break,
                }
            }
        });
        self.inner.borrow_mut().ticker = Some(ticker);
    }

    /// Feed this node from `upstream` by attaching it there as a sink
    pub(crate) fn attach_to(&self, upstream: &Distributor) {
        self.mark_connecting();
        if upstream.state() == NodeState::Disconnected {
            self.shutdown(DisconnectReason::Failed(format!(
                "upstream '{}' is closed",
                upstream.key()
            )));
            return;
        }

        let factory: Rc<dyn SinkFactory> = Rc::new(StageSinkFactory { node: self.clone() });
        let pending = upstream.add_sink(factory);
        if !pending.is_settled() {
            // Going down before the upstream connects withdraws the request
            self.on_teardown(move || {
                pending.cancel();
            });
        }
    }
}

impl fmt::Debug for Distributor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("Distributor")
                .field("key", &inner.key)
                .field("stage", &inner.stage.name())
                .field("state", &inner.state)
                .field("sinks", &inner.sinks.len())
                .finish(),
            Err(_) => f.write_str("Distributor { <busy> }"),
        }
    }
}

/// Non-owning handle to a distribution node
#[derive(Clone)]
pub struct WeakDistributor {
    inner: Weak<RefCell<NodeInner>>,
}

impl WeakDistributor {
    pub fn upgrade(&self) -> Option<Distributor> {
        self.inner.upgrade().map(|inner| Distributor { inner })
    }
}

/// A downstream node seen as a sink of its upstream
struct StageSinkFactory {
    node: Distributor,
}

impl SinkFactory for StageSinkFactory {
    fn build_sink(&self, _address: &str) -> Box<dyn Sink> {
        Box::new(StageSink {
            node: self.node.clone(),
        })
    }

    fn request_failed(&self, reason: &DisconnectReason) {
        self.node.on_upstream_disconnect(reason.clone());
    }
}

struct StageSink {
    node: Distributor,
}

impl Sink for StageSink {
    fn make_connection(&mut self, transport: Rc<dyn Transport>) {
        self.node.on_upstream_connect(transport);
    }

    fn data_received(&mut self, event: &ValueEvent) {
        self.node.on_upstream_value(event.clone());
    }

    fn connection_lost(&mut self, reason: &DisconnectReason) {
        self.node.on_upstream_disconnect(reason.clone());
    }
}

/// Attached sink's view of its node
///
/// Returned by a resolved [`PendingSink`] and passed to the sink's
/// `make_connection`. Closing it detaches the sink.
#[derive(Clone)]
pub struct SinkHandle {
    node: Weak<RefCell<NodeInner>>,
    id: SinkId,
    key: String,
}

impl SinkHandle {
    pub fn id(&self) -> SinkId {
        self.id
    }

    /// Subscription key of the node
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The node, if it is still alive
    pub fn node(&self) -> Option<Distributor> {
        self.node.upgrade().map(|inner| Distributor { inner })
    }

    pub fn is_attached(&self) -> bool {
        self.node().is_some_and(|node| node.has_sink(self.id))
    }

    /// Detach the sink; returns `false` if it was already detached
    pub fn close(&self) -> bool {
        match self.node() {
            Some(node) => node.remove_sink(self.id),
            None => false,
        }
    }
}

impl Transport for SinkHandle {
    fn lose_connection(&self) {
        self.close();
    }

    fn peer(&self) -> String {
        self.key.clone()
    }
}

impl fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkHandle")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}
