//! Notifier
//!
//! Watches request URLs on behalf of a set of destinations and hands a
//! message to its channel on every update. One broker subscription is held
//! per URL however many destinations share it; destinations carry an
//! optional expiry checked at delivery time.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use chrono::{DateTime, Utc};

use super::channel::{format_message, NotificationChannel};
use crate::broker::Broker;
use crate::device::DeviceError;
use crate::dist::{DisconnectReason, PendingSink, Sink, SinkFactory, Transport};
use crate::event::ValueEvent;

/// When a destination stops receiving notifications (`None` = never)
pub type Expiry = Option<DateTime<Utc>>;

/// Destinations of one URL with their expiry
pub type Destinations = BTreeMap<String, Expiry>;

type TransportCell = Rc<RefCell<Option<Rc<dyn Transport>>>>;

struct Registration {
    destinations: Destinations,
    pending: Option<PendingSink>,
    transport: TransportCell,
}

impl Registration {
    /// Subscription attached or still on its way
    fn is_live(&self) -> bool {
        self.transport.borrow().is_some()
            || self.pending.as_ref().is_some_and(|p| !p.is_settled())
    }
}

struct NotifierInner {
    broker: Rc<Broker>,
    channel: Rc<dyn NotificationChannel>,
    registrations: RefCell<BTreeMap<String, Registration>>,
}

/// Sends notifications for updates of registered URLs
#[derive(Clone)]
pub struct Notifier {
    inner: Rc<NotifierInner>,
}

impl Notifier {
    pub fn new(broker: Rc<Broker>, channel: Rc<dyn NotificationChannel>) -> Self {
        Self {
            inner: Rc::new(NotifierInner {
                broker,
                channel,
                registrations: RefCell::new(BTreeMap::new()),
            }),
        }
    }

    /// Name of the channel; configuration sections address notifiers by it
    pub fn name(&self) -> &str {
        self.inner.channel.name()
    }

    /// Add `destination` to `url`, or update its expiry
    ///
    /// The first destination of a URL subscribes to it. If the URL already
    /// holds a value the new destination is notified right away.
    pub fn register(
        &self,
        url: &str,
        destination: &str,
        expiry: Expiry,
    ) -> Result<(), DeviceError> {
        let mut destinations = {
            let mut registrations = self.inner.registrations.borrow_mut();
            match registrations.get(url).map(Registration::is_live) {
                Some(true) => {
                    if let Some(registration) = registrations.get_mut(url) {
                        registration.destinations.insert(destination.to_string(), expiry);
                    }
                    tracing::debug!(url = %url, destination = %destination, "Destination updated");
                    return Ok(());
                }
                // Subscription failed; resubscribe keeping its destinations
                Some(false) => registrations
                    .remove(url)
                    .map(|r| r.destinations)
                    .unwrap_or_default(),
                None => Destinations::new(),
            }
        };
        destinations.insert(destination.to_string(), expiry);

        let transport: TransportCell = Rc::new(RefCell::new(None));
        self.inner.registrations.borrow_mut().insert(
            url.to_string(),
            Registration {
                destinations,
                pending: None,
                transport: Rc::clone(&transport),
            },
        );

        let factory: Rc<dyn SinkFactory> = Rc::new(NotifierSinkFactory {
            notifier: Rc::downgrade(&self.inner),
            url: url.to_string(),
            transport,
        });

        match self.inner.broker.subscribe(url, factory) {
            Ok(pending) => {
                if let Some(registration) = self.inner.registrations.borrow_mut().get_mut(url) {
                    registration.pending = Some(pending);
                }
                tracing::debug!(
                    channel = %self.name(),
                    url = %url,
                    destination = %destination,
                    "Registered"
                );
                Ok(())
            }
            Err(err) => {
                self.inner.registrations.borrow_mut().remove(url);
                tracing::warn!(
                    channel = %self.name(),
                    url = %url,
                    error = %err,
                    "Registration failed"
                );
                Err(err)
            }
        }
    }

    /// Remove `destination` from `url`; the last one releases the subscription
    pub fn unregister(&self, url: &str, destination: &str) -> bool {
        let released = {
            let mut registrations = self.inner.registrations.borrow_mut();
            let Some(registration) = registrations.get_mut(url) else {
                return false;
            };
            if registration.destinations.remove(destination).is_none() {
                return false;
            }
            if registration.destinations.is_empty() {
                registrations.remove(url)
            } else {
                None
            }
        };

        tracing::debug!(
            channel = %self.name(),
            url = %url,
            destination = %destination,
            "Unregistered"
        );

        if let Some(registration) = released {
            if let Some(pending) = registration.pending {
                pending.cancel();
            }
            let transport = registration.transport.borrow_mut().take();
            if let Some(transport) = transport {
                transport.lose_connection();
            }
        }
        true
    }

    /// Snapshot of every URL and its destinations
    pub fn registered(&self) -> BTreeMap<String, Destinations> {
        self.inner
            .registrations
            .borrow()
            .iter()
            .map(|(url, r)| (url.clone(), r.destinations.clone()))
            .collect()
    }

    /// Send a message for `event` to every destination of `url` not expired at `now`
    ///
    /// Returns the number of messages handed to the channel.
    pub fn notify(&self, url: &str, event: &ValueEvent, now: DateTime<Utc>) -> usize {
        let destinations: Vec<String> = {
            let registrations = self.inner.registrations.borrow();
            let Some(registration) = registrations.get(url) else {
                return 0;
            };
            registration
                .destinations
                .iter()
                .filter(|(destination, expiry)| match expiry {
                    Some(at) if *at <= now => {
                        tracing::trace!(url = %url, destination = %destination, "Destination expired");
                        false
                    }
                    _ => true,
                })
                .map(|(destination, _)| destination.clone())
                .collect()
        };

        if destinations.is_empty() {
            return 0;
        }

        let message = format_message(url, event);
        for destination in &destinations {
            self.inner.channel.send(url, &message, destination);
        }
        destinations.len()
    }

    /// Drop every registration and its subscription
    pub fn clear(&self) {
        let registrations = std::mem::take(&mut *self.inner.registrations.borrow_mut());
        for (_, registration) in registrations {
            if let Some(pending) = registration.pending {
                pending.cancel();
            }
            let transport = registration.transport.borrow_mut().take();
            if let Some(transport) = transport {
                transport.lose_connection();
            }
        }
    }
}

struct NotifierSinkFactory {
    notifier: Weak<NotifierInner>,
    url: String,
    transport: TransportCell,
}

impl SinkFactory for NotifierSinkFactory {
    fn build_sink(&self, _address: &str) -> Box<dyn Sink> {
        Box::new(NotifierSink {
            notifier: Weak::clone(&self.notifier),
            url: self.url.clone(),
            transport: Rc::clone(&self.transport),
        })
    }

    fn request_failed(&self, reason: &DisconnectReason) {
        tracing::warn!(url = %self.url, reason = %reason, "Notification subscription failed");
    }
}

struct NotifierSink {
    notifier: Weak<NotifierInner>,
    url: String,
    transport: TransportCell,
}

impl Sink for NotifierSink {
    fn make_connection(&mut self, transport: Rc<dyn Transport>) {
        *self.transport.borrow_mut() = Some(transport);
    }

    fn data_received(&mut self, event: &ValueEvent) {
        if let Some(inner) = self.notifier.upgrade() {
            Notifier { inner }.notify(&self.url, event, Utc::now());
        }
    }

    fn connection_lost(&mut self, reason: &DisconnectReason) {
        if *reason != DisconnectReason::Closed {
            tracing::warn!(url = %self.url, reason = %reason, "Notification subscription lost");
        }
        self.transport.borrow_mut().take();
    }
}
