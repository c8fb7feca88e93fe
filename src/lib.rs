//! pvbroker: live process-variable subscription broker
//!
//! Streams telemetry from a few instrumentation sources to many clients.
//! Each client asks for a source by URL, optionally with a pipeline of
//! transforms in the query (`epics:ring:current?scale=1000&rate=1`).
//! Equivalent requests share one live chain of distribution nodes, so a
//! source is monitored once however many clients watch it.
//!
//! # Layout
//!
//! - [`url`]: URL model and canonical key rendering
//! - [`event`]: value events (JSON objects)
//! - [`dist`]: fan-out distribution nodes and the sink contract
//! - [`stage`]: pipeline stages (rate shaping, buffering, filters, transforms)
//! - [`registry`]: request planning and the live subscription table
//! - [`device`]: backend routing, drivers and the provider cache
//! - [`broker`]: the facade tying device routing to the registry
//! - [`notify`]: notifications on value updates
//! - [`server`], [`session`]: line-protocol TCP front-end
//!
//! Everything runs on one thread inside a `tokio::task::LocalSet`; drivers
//! on other threads hand their events over through
//! [`DriverPublisher`](device::DriverPublisher).

pub mod broker;
pub mod device;
pub mod dist;
pub mod error;
pub mod event;
pub mod notify;
pub mod registry;
pub mod server;
pub mod session;
pub mod stage;
pub mod stats;
pub mod url;

pub use broker::Broker;
pub use dist::{DisconnectReason, PendingSink, Sink, SinkFactory, SinkHandle, Transport};
pub use error::{Error, Result, SubscribeError};
pub use event::ValueEvent;
pub use registry::{RegistryConfig, SubscriptionRegistry};
pub use server::{BrokerServer, ServerConfig};
