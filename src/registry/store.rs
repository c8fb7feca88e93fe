//! Subscription registry implementation
//!
//! The table of live subscriptions, keyed by canonical key, plus the chain
//! composer that reuses or creates one node per planned key.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::config::RegistryConfig;
use super::entry::SubscriptionInfo;
use super::key::SubscriptionPlan;
use crate::dist::{Distributor, PendingSink, SinkFactory, WeakDistributor};
use crate::error::SubscribeError;
use crate::stage::StageSpec;
use crate::stats::RegistryStats;

struct RegistryInner {
    table: RefCell<HashMap<String, Distributor>>,
    config: RegistryConfig,
}

impl RegistryInner {
    /// Remove `key` only if it still maps to `node`
    fn deregister(&self, key: &str, node: &WeakDistributor) {
        let removed = {
            let mut table = self.table.borrow_mut();
            let same = match (table.get(key), node.upgrade()) {
                (Some(current), Some(node)) => current.ptr_eq(&node),
                _ => false,
            };
            if same {
                table.remove(key)
            } else {
                None
            }
        };

        if removed.is_some() {
            tracing::debug!(
                key = %key,
                subscriptions = self.table.borrow().len(),
                "Subscription deregistered"
            );
        }
    }
}

/// Table of live subscriptions
///
/// Cheap to clone; clones share the table. Nodes hold only a weak reference
/// back, so dropping every registry handle does not keep nodes alive.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Rc<RegistryInner>,
}

impl SubscriptionRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            inner: Rc::new(RegistryInner {
                table: RefCell::new(HashMap::new()),
                config,
            }),
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Live node under `key`
    pub fn get(&self, key: &str) -> Option<Distributor> {
        self.inner.table.borrow().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.table.borrow().contains_key(key)
    }

    /// Number of live subscriptions
    pub fn len(&self) -> usize {
        self.inner.table.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.table.borrow().is_empty()
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.inner.table.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Snapshot of one subscription
    pub fn info(&self, key: &str) -> Option<SubscriptionInfo> {
        self.get(key).map(|node| SubscriptionInfo::from_node(&node))
    }

    /// Registry-wide counters
    pub fn stats(&self) -> RegistryStats {
        let nodes: Vec<_> = self.inner.table.borrow().values().cloned().collect();
        nodes.iter().fold(
            RegistryStats {
                subscriptions: nodes.len(),
                ..Default::default()
            },
            |mut stats, node| {
                stats.sinks += node.sink_count();
                stats.pending += node.pending_count();
                if node.is_persistent() {
                    stats.persistent += 1;
                }
                stats
            },
        )
    }

    fn register(&self, node: &Distributor) {
        let key = node.key();
        let registry: Weak<RegistryInner> = Rc::downgrade(&self.inner);
        let weak = node.downgrade();
        let hook_key = key.clone();
        node.on_teardown(move || {
            if let Some(registry) = registry.upgrade() {
                registry.deregister(&hook_key, &weak);
            }
        });

        let subscriptions = {
            let mut table = self.inner.table.borrow_mut();
            table.insert(key.clone(), node.clone());
            table.len()
        };

        tracing::info!(
            key = %key,
            stage = node.stage_name(),
            subscriptions = subscriptions,
            "Subscription registered"
        );
    }

    /// Compose the chain for `plan` and attach a sink built by `factory`
    ///
    /// Every planned key is looked up first and reused while live. A fresh
    /// driver-fed node is handed to `connect`, which must eventually call
    /// its `on_upstream_connect` (or fail it).
    pub fn subscribe<C>(
        &self,
        plan: &SubscriptionPlan,
        connect: C,
        factory: Rc<dyn SinkFactory>,
    ) -> PendingSink
    where
        C: FnOnce(&Distributor),
    {
        let max = self.inner.config.max_subscriptions;
        if max > 0 {
            let (live, missing) = {
                let table = self.inner.table.borrow();
                let missing = plan.keys().filter(|k| !table.contains_key(*k)).count();
                (table.len(), missing)
            };
            if live + missing > max {
                tracing::warn!(
                    key = %plan.key(),
                    subscriptions = live,
                    max = max,
                    "Subscription rejected: limit reached"
                );
                return PendingSink::rejected(plan.key(), SubscribeError::CapacityExceeded { max });
            }
        }

        let mut current = match self.get(&plan.base_key) {
            Some(node) => node,
            None => {
                let node = Distributor::new(plan.base_key.as_str(), StageSpec::Passthrough.build());
                self.register(&node);
                node.mark_connecting();
                connect(&node);
                node
            }
        };

        for stage in &plan.stages {
            current = match self.get(&stage.key) {
                Some(node) => node,
                None => {
                    let node = Distributor::new(stage.key.as_str(), stage.spec.build());
                    self.register(&node);
                    node.attach_to(&current);
                    node
                }
            };
        }

        current.add_sink(factory)
    }

    /// Tear down every subscription
    pub fn release_all(&self) {
        let nodes: Vec<_> = self.inner.table.borrow().values().cloned().collect();
        tracing::info!(subscriptions = nodes.len(), "Releasing all subscriptions");
        for node in nodes {
            node.release();
        }
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::task::LocalSet;

    use super::*;
    use crate::dist::{DisconnectReason, NodeState};
    use crate::event::ValueEvent;
    use crate::testing::{ManualTransport, Recorder};

    /// Registry plus a record of every driver-fed node it asked to connect
    struct Harness {
        registry: SubscriptionRegistry,
        roots: Rc<RefCell<Vec<Distributor>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(RegistryConfig::default())
        }

        fn with_config(config: RegistryConfig) -> Self {
            Self {
                registry: SubscriptionRegistry::with_config(config),
                roots: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn subscribe(&self, request: &str, rec: &Recorder) -> PendingSink {
            let plan = SubscriptionPlan::parse(request).unwrap();
            let roots = Rc::clone(&self.roots);
            self.registry
                .subscribe(&plan, move |node| roots.borrow_mut().push(node.clone()), rec.factory())
        }

        fn connects(&self) -> usize {
            self.roots.borrow().len()
        }

        fn root(&self) -> Distributor {
            self.roots.borrow().last().cloned().unwrap()
        }

        fn connect_root(&self) -> Rc<ManualTransport> {
            let transport = ManualTransport::new();
            self.root().on_upstream_connect(transport.clone());
            transport
        }

        fn feed(&self, values: &[f64]) {
            for v in values {
                self.root().on_upstream_value(ValueEvent::from_number(*v));
            }
        }
    }

    #[tokio::test]
    async fn test_dedup_equivalent_requests() {
        let h = Harness::new();
        let a = Recorder::new();
        let b = Recorder::new();

        let pa = h.subscribe("epics:pv?scale=2&offset=1", &a);
        let pb = h.subscribe("EPICS:pv?OFFSET=1.0;Scale=2", &b);
        h.connect_root();
        let ha = pa.await.unwrap();
        let hb = pb.await.unwrap();

        assert_eq!(h.connects(), 1);
        assert_eq!(ha.key(), hb.key());
        assert!(ha.node().unwrap().ptr_eq(&hb.node().unwrap()));
        assert_eq!(h.registry.len(), 3);

        h.feed(&[5.0]);
        assert_eq!(a.values(), vec![11.0]);
        assert_eq!(b.values(), vec![11.0]);
    }

    #[tokio::test]
    async fn test_scale_before_offset() {
        let h = Harness::new();
        let rec = Recorder::new();
        let pending = h.subscribe("epics:pv?offset=3&scale=2", &rec);
        h.connect_root();
        pending.await.unwrap();

        h.feed(&[5.0]);
        assert_eq!(rec.values(), vec![13.0]);
    }

    #[tokio::test]
    async fn test_refcount_teardown() {
        let h = Harness::new();
        let rec = Recorder::new();
        let pending = h.subscribe("epics:pv?threshold=5", &rec);
        let upstream = h.connect_root();
        let handle = pending.await.unwrap();
        assert_eq!(h.registry.keys(), vec!["epics:pv", "epics:pv?threshold=5"]);

        handle.close();
        assert!(h.registry.is_empty());
        assert_eq!(upstream.lost(), 1);

        let again = Recorder::new();
        let pending = h.subscribe("epics:pv?threshold=5", &again);
        assert_eq!(h.connects(), 2);
        h.connect_root();
        pending.await.unwrap();
        assert_eq!(h.registry.len(), 2);
    }

    #[tokio::test]
    async fn test_shared_prefix_survives() {
        let h = Harness::new();
        let short = Recorder::new();
        let long = Recorder::new();
        let ps = h.subscribe("epics:pv?scale=2", &short);
        let pl = h.subscribe("epics:pv?scale=2&threshold=5", &long);
        h.connect_root();
        ps.await.unwrap();
        let hl = pl.await.unwrap();

        hl.close();
        assert_eq!(h.registry.keys(), vec!["epics:pv", "epics:pv?scale=2"]);

        h.feed(&[1.0]);
        assert_eq!(short.values(), vec![2.0]);
        assert!(long.values().is_empty());
    }

    #[tokio::test]
    async fn test_buffer_exemption() {
        let h = Harness::new();
        let rec = Recorder::new();
        let pending = h.subscribe("epics:pv?buffer=3", &rec);
        h.connect_root();
        let handle = pending.await.unwrap();

        h.feed(&[1.0, 2.0]);
        handle.close();
        assert!(h.registry.contains("epics:pv?buffer=3"));
        assert!(h.registry.contains("epics:pv"));
        assert_eq!(h.registry.stats().persistent, 1);

        h.feed(&[3.0, 4.0]);

        let late = Recorder::new();
        let pending = h.subscribe("epics:pv?buffer=3", &late);
        assert!(pending.is_settled());
        pending.await.unwrap();
        assert_eq!(late.values(), vec![2.0, 3.0, 4.0]);
        assert_eq!(h.connects(), 1);
    }

    #[tokio::test]
    async fn test_replay_on_attach() {
        let h = Harness::new();
        let first = Recorder::new();
        let pending = h.subscribe("epics:pv?units=mA", &first);
        h.connect_root();
        pending.await.unwrap();
        h.feed(&[7.0, 8.0]);

        let late = Recorder::new();
        h.subscribe("epics:pv?units=mA", &late).await.unwrap();

        assert_eq!(late.values(), vec![8.0]);
        assert_eq!(late.events()[0].get("units"), Some(&serde_json::json!("mA")));
    }

    #[tokio::test]
    async fn test_upstream_failure_tears_down_chain() {
        let h = Harness::new();
        let queued = Recorder::new();
        let pending = h.subscribe("epics:pv?scale=2&threshold=1", &queued);
        assert_eq!(h.registry.len(), 3);

        h.root()
            .on_upstream_disconnect(DisconnectReason::Failed("no such channel".into()));

        assert!(matches!(
            pending.await,
            Err(SubscribeError::UpstreamConnect(msg)) if msg == "no such channel"
        ));
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_failure_notifies_attached_sinks() {
        let h = Harness::new();
        let rec = Recorder::new();
        let pending = h.subscribe("epics:pv?scale=2", &rec);
        h.connect_root();
        pending.await.unwrap();

        h.root().on_upstream_disconnect(DisconnectReason::Failed("ioc down".into()));

        assert_eq!(rec.lost(), vec![DisconnectReason::Failed("ioc down".into())]);
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let h = Harness::with_config(RegistryConfig::default().max_subscriptions(2));
        let a = Recorder::new();
        let pa = h.subscribe("epics:pv?scale=2", &a);

        let b = Recorder::new();
        let pb = h.subscribe("epics:pv?scale=2&offset=1", &b);
        assert!(matches!(pb.await, Err(SubscribeError::CapacityExceeded { max: 2 })));
        assert_eq!(h.registry.len(), 2);

        let c = Recorder::new();
        let pc = h.subscribe("epics:pv?scale=2", &c);
        h.connect_root();
        assert!(pa.await.is_ok());
        assert!(pc.await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_deregistration_ignored() {
        let h = Harness::new();
        let original = Distributor::new("epics:pv", StageSpec::Passthrough.build());
        h.registry.register(&original);
        let replacement = Distributor::new("epics:pv", StageSpec::Passthrough.build());
        h.registry.register(&replacement);

        original.release();
        assert!(h.registry.get("epics:pv").unwrap().ptr_eq(&replacement));

        replacement.release();
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_release_all() {
        let h = Harness::new();
        let rec = Recorder::new();
        let pending = h.subscribe("epics:pv?buffer=5", &rec);
        h.connect_root();
        pending.await.unwrap();

        h.registry.release_all();
        assert!(h.registry.is_empty());
        assert_eq!(rec.lost(), vec![DisconnectReason::Closed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_flush() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new();
                let rec = Recorder::new();
                let pending = h.subscribe("epics:pv?ratelimit=1", &rec);
                h.connect_root();
                pending.await.unwrap();

                h.feed(&[1.0, 2.0]);
                assert!(rec.values().is_empty());

                tokio::time::sleep(Duration::from_millis(1500)).await;
                assert_eq!(rec.values(), vec![2.0]);

                tokio::time::sleep(Duration::from_secs(2)).await;
                assert_eq!(rec.values(), vec![2.0]);
            })
            .await;
    }

    #[tokio::test]
    async fn test_info_snapshot() {
        let h = Harness::new();
        let rec = Recorder::new();
        let _pending = h.subscribe("epics:pv?rate=2", &rec);

        let info = h.registry.info("epics:pv?rate=2").unwrap();
        assert_eq!(info.stage, "rate");
        assert_eq!(info.state, NodeState::Connecting);
        assert_eq!(info.pending, 1);
        assert!(!info.persistent);

        let root = h.registry.info("epics:pv").unwrap();
        assert_eq!(root.stage, "client");
        assert_eq!(root.pending, 1);
    }
}
