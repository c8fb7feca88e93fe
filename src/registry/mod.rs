//! Subscription registry and pipeline composer
//!
//! A request URL is planned into a chain of canonical keys, one per
//! recognized parameter, and each key maps to at most one live
//! [`Distributor`](crate::dist::Distributor). Identical requests, however
//! they are spelled, share every node of their chain.
//!
//! # Architecture
//!
//! ```text
//!                      SubscriptionRegistry
//!              ┌──────────────────────────────────┐
//!              │ table: HashMap<key, Distributor> │
//!              └────────────────┬─────────────────┘
//!                               │
//!   "epics:pv"  ─────────►  [client]  ◄── driver connection
//!                               │
//!   "epics:pv?scale=2" ───► [scale]  ──► sinks
//!                               │
//!   "epics:pv?scale=2&threshold=5" ──► [threshold] ──► sinks
//! ```
//!
//! Nodes deregister themselves through a teardown hook when their last sink
//! detaches; the hook only removes the entry if it still points at the same
//! node, so a fresh node registered under the same key is never evicted by a
//! stale one.

pub mod config;
pub mod entry;
pub mod error;
pub mod key;
pub mod params;
pub mod store;

pub use config::RegistryConfig;
pub use entry::SubscriptionInfo;
pub use error::ValidationError;
pub use key::{PlannedStage, SubscriptionPlan};
pub use params::{ParamRule, EXCLUSIVE, PARAMETERS};
pub use store::SubscriptionRegistry;
