//! Notifications
//!
//! A [`Notifier`] subscribes to request URLs through the broker and hands a
//! short message to its [`NotificationChannel`] for every update, once per
//! registered destination. Registrations come from code or from a
//! configuration file kept in sync by a [`ConfigWatcher`].

pub mod channel;
pub mod config;
pub mod notifier;

pub use channel::{format_message, LogChannel, NotificationChannel};
pub use config::{parse_expiry, ConfigWatcher, NotifierConfig, ReconcileSummary};
pub use notifier::{Destinations, Expiry, Notifier};
