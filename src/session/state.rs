//! Client session state
//!
//! Tracks the subscriptions one front-end connection holds and turns their
//! updates into reply lines. Replies go out through an unbounded channel the
//! connection drains into its socket:
//!
//! ```text
//! {"epics:pv?scale=2": {"value": 6.0, "connected": true, ...}}
//! {"error": "subscription limit reached (4)", "url": "epics:other"}
//! ```
//!
//! Subscribing spawns a local waiter task per request, so a session must
//! live inside a `tokio::task::LocalSet`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use super::request::{Action, Request};
use crate::broker::Broker;
use crate::dist::{DisconnectReason, PendingSink, Sink, SinkFactory, Transport};
use crate::error::{Error, SubscribeError};
use crate::event::ValueEvent;

/// Reply lines waiting to be written
pub type Outbound = mpsc::UnboundedSender<String>;

/// `{"<url>": <event>}`
pub fn data_line(url: &str, event: &ValueEvent) -> String {
    let mut reply = Map::new();
    reply.insert(url.to_string(), Value::Object(event.as_map().clone()));
    Value::Object(reply).to_string()
}

/// `{"error": "<message>", "url": "<url>"}`
pub fn error_line(url: &str, message: &str) -> String {
    serde_json::json!({ "error": message, "url": url }).to_string()
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Accepting requests
    Active,
    /// Every subscription released; requests are ignored
    Closed,
}

/// State shared between a subscription and the sink serving it
#[derive(Default)]
struct Slot {
    transport: Option<Rc<dyn Transport>>,
    last: Option<String>,
    released: bool,
    once: bool,
    attached: bool,
}

type SharedSlot = Rc<RefCell<Slot>>;

struct SessionSinkFactory {
    url: String,
    slot: SharedSlot,
    out: Outbound,
}

impl SinkFactory for SessionSinkFactory {
    fn build_sink(&self, _address: &str) -> Box<dyn Sink> {
        Box::new(SessionSink {
            url: self.url.clone(),
            slot: Rc::clone(&self.slot),
            out: self.out.clone(),
        })
    }
}

struct SessionSink {
    url: String,
    slot: SharedSlot,
    out: Outbound,
}

fn detach(slot: &SharedSlot) {
    let transport = slot.borrow_mut().transport.take();
    if let Some(transport) = transport {
        transport.lose_connection();
    }
}

impl Sink for SessionSink {
    fn make_connection(&mut self, transport: Rc<dyn Transport>) {
        // Released while the node was attaching us
        if self.slot.borrow().released {
            transport.lose_connection();
            return;
        }
        self.slot.borrow_mut().transport = Some(transport);
    }

    fn data_received(&mut self, event: &ValueEvent) {
        let line = data_line(&self.url, event);
        let (once, attached) = {
            let slot = self.slot.borrow();
            (slot.once, slot.attached)
        };

        // A one-shot request answers with the newest event seen while attaching
        if once && !attached {
            self.slot.borrow_mut().last = Some(line);
            return;
        }

        let _ = self.out.send(line.clone());
        self.slot.borrow_mut().last = Some(line);
        if once {
            detach(&self.slot);
        }
    }

    fn connection_lost(&mut self, reason: &DisconnectReason) {
        let released = {
            let mut slot = self.slot.borrow_mut();
            slot.transport = None;
            slot.released
        };
        if let DisconnectReason::Failed(cause) = reason {
            if !released {
                let _ = self.out.send(error_line(&self.url, cause));
            }
        }
    }
}

/// One request the session holds
struct Subscription {
    slot: SharedSlot,
    cancel: Rc<Notify>,
    waiter: JoinHandle<()>,
}

impl Subscription {
    /// Attached, or still waiting to be
    fn is_live(&self) -> bool {
        let slot = self.slot.borrow();
        !slot.released && (slot.transport.is_some() || !self.waiter.is_finished())
    }

    fn last(&self) -> Option<String> {
        self.slot.borrow().last.clone()
    }

    fn release(&self) {
        self.slot.borrow_mut().released = true;
        self.cancel.notify_one();
        let transport = self.slot.borrow_mut().transport.take();
        if let Some(transport) = transport {
            transport.lose_connection();
        }
    }
}

/// Wait for the sink to be attached, reporting failure to the client
async fn await_attach(
    url: String,
    pending: PendingSink,
    cancel: Rc<Notify>,
    slot: SharedSlot,
    out: Outbound,
) {
    tokio::pin!(pending);
    tokio::select! {
        outcome = &mut pending => match outcome {
            Ok(_) => {
                let reply = {
                    let mut slot = slot.borrow_mut();
                    slot.attached = true;
                    if slot.once && !slot.released {
                        slot.last.clone()
                    } else {
                        None
                    }
                };
                if let Some(line) = reply {
                    let _ = out.send(line);
                    detach(&slot);
                }
            }
            Err(SubscribeError::Cancelled(_)) => {}
            Err(err) => {
                if !slot.borrow().released {
                    tracing::debug!(url = %url, error = %err, "Subscription failed");
                    let _ = out.send(error_line(&url, &err.to_string()));
                }
            }
        },
        _ = cancel.notified() => {
            pending.cancel();
        }
    }
}

/// Per-connection request handling
pub struct ClientSession {
    id: u64,
    broker: Rc<Broker>,
    out: Outbound,
    phase: SessionPhase,
    subscriptions: BTreeMap<String, Subscription>,
    gets: Vec<Subscription>,
}

impl ClientSession {
    pub fn new(id: u64, broker: Rc<Broker>, out: Outbound) -> Self {
        Self {
            id,
            broker,
            out,
            phase: SessionPhase::Active,
            subscriptions: BTreeMap::new(),
            gets: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// URLs with a live `SUB`
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .iter()
            .filter(|(_, sub)| sub.is_live())
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Handle one raw request line
    ///
    /// Blank lines are ignored. A malformed line is answered with an error
    /// reply and returned as [`Error::Protocol`].
    pub fn handle_line(&mut self, line: &str) -> Result<(), Error> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        match Request::parse(line) {
            Ok(request) => {
                self.handle(request);
                Ok(())
            }
            Err(err) => {
                self.send(error_line(line, &err.to_string()));
                Err(err)
            }
        }
    }

    pub fn handle(&mut self, request: Request) {
        if self.phase == SessionPhase::Closed {
            return;
        }
        tracing::trace!(session_id = self.id, request = %request, "Request");

        match request.action {
            Action::Subscribe => self.subscribe(&request.url),
            Action::Get => self.get(&request.url),
            Action::Unsubscribe => self.unsubscribe(&request.url),
        }
    }

    fn subscribe(&mut self, url: &str) {
        if let Some(sub) = self.subscriptions.get(url) {
            if sub.is_live() {
                if let Some(line) = sub.last() {
                    self.send(line);
                }
                return;
            }
        }
        self.subscriptions.remove(url);

        if let Some(sub) = self.start(url, false) {
            self.subscriptions.insert(url.to_string(), sub);
        }
    }

    fn get(&mut self, url: &str) {
        let latest = self
            .subscriptions
            .get(url)
            .filter(|sub| sub.is_live())
            .and_then(Subscription::last);
        if let Some(line) = latest {
            self.send(line);
            return;
        }

        self.gets.retain(Subscription::is_live);
        if let Some(sub) = self.start(url, true) {
            self.gets.push(sub);
        }
    }

    fn unsubscribe(&mut self, url: &str) {
        match self.subscriptions.remove(url) {
            Some(sub) => {
                sub.release();
                tracing::debug!(session_id = self.id, url = %url, "Unsubscribed");
            }
            None => self.send(error_line(url, "not subscribed")),
        }
    }

    fn start(&self, url: &str, once: bool) -> Option<Subscription> {
        let slot: SharedSlot = Rc::new(RefCell::new(Slot {
            once,
            ..Slot::default()
        }));
        let factory = Rc::new(SessionSinkFactory {
            url: url.to_string(),
            slot: Rc::clone(&slot),
            out: self.out.clone(),
        });

        match self.broker.subscribe(url, factory) {
            Ok(pending) => {
                let cancel = Rc::new(Notify::new());
                let waiter = tokio::task::spawn_local(await_attach(
                    url.to_string(),
                    pending,
                    Rc::clone(&cancel),
                    Rc::clone(&slot),
                    self.out.clone(),
                ));
                Some(Subscription {
                    slot,
                    cancel,
                    waiter,
                })
            }
            Err(err) => {
                tracing::debug!(session_id = self.id, url = %url, error = %err, "Request rejected");
                self.send(error_line(url, &err.to_string()));
                None
            }
        }
    }

    fn send(&self, line: String) {
        let _ = self.out.send(line);
    }

    /// Release every subscription the session holds
    pub fn close(&mut self) {
        if self.phase == SessionPhase::Closed {
            return;
        }
        self.phase = SessionPhase::Closed;

        let released = self.subscriptions.len() + self.gets.len();
        for (_, sub) in std::mem::take(&mut self.subscriptions) {
            sub.release();
        }
        for sub in self.gets.drain(..) {
            sub.release();
        }
        tracing::debug!(session_id = self.id, released = released, "Session closed");
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.close();
    }
}
