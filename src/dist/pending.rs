//! Pending subscribe requests
//!
//! A request is queued on a node until the node has an upstream. The caller
//! holds the matching [`PendingSink`], a future over a oneshot channel that
//! resolves to the attached [`SinkHandle`] or to the reason it never will.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::node::SinkHandle;
use super::sink::SinkFactory;
use crate::error::SubscribeError;

type Outcome = Result<SinkHandle, SubscribeError>;

/// Shared settle-once slot between the request and its future
struct Slot {
    key: String,
    tx: RefCell<Option<oneshot::Sender<Outcome>>>,
    on_cancel: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Slot {
    fn is_open(&self) -> bool {
        self.tx.borrow().is_some()
    }

    fn settle(&self, outcome: Outcome) -> bool {
        let tx = self.tx.borrow_mut().take();
        match tx {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// Queued request, owned by the node
pub(crate) struct PendingRequest {
    slot: Rc<Slot>,
    factory: Rc<dyn SinkFactory>,
}

impl PendingRequest {
    /// Still waiting (not cancelled, not settled)
    pub fn is_open(&self) -> bool {
        self.slot.is_open()
    }

    pub fn factory(&self) -> &Rc<dyn SinkFactory> {
        &self.factory
    }

    /// Run `hook` if the caller withdraws the request
    pub fn on_cancel(&self, hook: impl FnOnce() + 'static) {
        *self.slot.on_cancel.borrow_mut() = Some(Box::new(hook));
    }

    pub fn resolve(self, handle: SinkHandle) -> bool {
        self.slot.settle(Ok(handle))
    }

    pub fn reject(self, err: SubscribeError) -> bool {
        self.slot.settle(Err(err))
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if self.slot.is_open() {
            self.slot
                .settle(Err(SubscribeError::Closed(self.slot.key.clone())));
        }
    }
}

/// Caller side of a subscribe request
///
/// Await it to get the [`SinkHandle`]. Call [`PendingSink::cancel`] to
/// withdraw before the sink is attached.
#[must_use = "a pending sink does nothing unless awaited or cancelled"]
pub struct PendingSink {
    slot: Rc<Slot>,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingSink {
    pub(crate) fn new(key: &str, factory: Rc<dyn SinkFactory>) -> (Self, PendingRequest) {
        let (tx, rx) = oneshot::channel();
        let slot = Rc::new(Slot {
            key: key.to_string(),
            tx: RefCell::new(Some(tx)),
            on_cancel: RefCell::new(None),
        });
        let request = PendingRequest {
            slot: Rc::clone(&slot),
            factory,
        };
        (Self { slot, rx }, request)
    }

    /// A request that failed before it could be queued
    pub(crate) fn rejected(key: &str, err: SubscribeError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self {
            slot: Rc::new(Slot {
                key: key.to_string(),
                tx: RefCell::new(None),
                on_cancel: RefCell::new(None),
            }),
            rx,
        }
    }

    /// Subscription key the request targets
    pub fn key(&self) -> &str {
        &self.slot.key
    }

    /// Whether the request has been resolved, rejected or cancelled
    pub fn is_settled(&self) -> bool {
        !self.slot.is_open()
    }

    /// Withdraw the request
    ///
    /// Returns `false` if the sink was already attached (or the request
    /// already failed); detach an attached sink through its handle instead.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .slot
            .settle(Err(SubscribeError::Cancelled(self.slot.key.clone())));
        if cancelled {
            tracing::debug!(key = %self.slot.key, "Subscribe request cancelled");
            let hook = self.slot.on_cancel.borrow_mut().take();
            if let Some(hook) = hook {
                hook();
            }
        }
        cancelled
    }
}

impl Future for PendingSink {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => {
                Poll::Ready(Err(SubscribeError::Closed(self.slot.key.clone())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for PendingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingSink")
            .field("key", &self.slot.key)
            .field("settled", &self.is_settled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;
    use crate::dist::sink::Sink;
    use crate::event::ValueEvent;

    struct Nop;

    impl Sink for Nop {
        fn data_received(&mut self, _event: &ValueEvent) {}
    }

    fn factory() -> Rc<dyn SinkFactory> {
        Rc::new(|_: &str| -> Box<dyn Sink> { Box::new(Nop) })
    }

    #[test]
    fn test_cancel_before_settle() {
        let (pending, request) = PendingSink::new("epics:pv", factory());
        let mut fut = task::spawn(pending);
        assert_pending!(fut.poll());

        assert!(fut.cancel());
        assert!(!request.is_open());
        assert!(!fut.cancel());

        let outcome = assert_ready!(fut.poll());
        assert!(matches!(outcome, Err(SubscribeError::Cancelled(key)) if key == "epics:pv"));
    }

    #[test]
    fn test_cancel_hook_runs_once() {
        let (pending, request) = PendingSink::new("epics:pv", factory());
        let calls = Rc::new(std::cell::Cell::new(0));
        let counter = Rc::clone(&calls);
        request.on_cancel(move || counter.set(counter.get() + 1));

        assert!(pending.cancel());
        assert!(!pending.cancel());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_cancel_hook_skipped_when_settled() {
        let (pending, request) = PendingSink::new("epics:pv", factory());
        let calls = Rc::new(std::cell::Cell::new(0));
        let counter = Rc::clone(&calls);
        request.on_cancel(move || counter.set(counter.get() + 1));

        assert!(request.reject(SubscribeError::Closed("epics:pv".into())));
        assert!(!pending.cancel());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_reject_after_cancel_is_noop() {
        let (pending, request) = PendingSink::new("epics:pv", factory());
        pending.cancel();

        assert!(!request.reject(SubscribeError::Closed("epics:pv".into())));
    }

    #[test]
    fn test_dropped_request_reads_as_closed() {
        let (pending, request) = PendingSink::new("epics:pv", factory());
        drop(request);

        let mut fut = task::spawn(pending);
        let outcome = assert_ready!(fut.poll());
        assert!(matches!(outcome, Err(SubscribeError::Closed(_))));
    }

    #[test]
    fn test_rejected() {
        let pending = PendingSink::rejected("epics:pv", SubscribeError::CapacityExceeded { max: 4 });
        assert!(pending.is_settled());

        let mut fut = task::spawn(pending);
        let outcome = assert_ready!(fut.poll());
        assert!(matches!(outcome, Err(SubscribeError::CapacityExceeded { max: 4 })));
    }
}
