//! Fan-out distribution
//!
//! A [`Distributor`] multiplexes one upstream event stream onto any number
//! of sinks. Pipeline stages are distributors too: each is attached to its
//! upstream as an ordinary sink, so a subscription chain is a strict line of
//! nodes from the driver connection to the caller's sink.
//!
//! ```text
//!   driver ──► [client node] ──► [scale node] ──► [threshold node] ──► sinks
//!                   │                 │
//!                   └──► sinks        └──► sinks
//! ```
//!
//! Lifecycle: `Unattached → Connecting → Connected → Flowing → Disconnected`.
//! A node whose last sink detaches releases its upstream and runs its
//! teardown hooks (the registry uses one to deregister), unless its stage is
//! persistent.

pub mod node;
pub mod pending;
pub mod sink;
pub mod sinks;

pub use node::{Distributor, NodeState, SinkHandle, WeakDistributor};
pub use pending::PendingSink;
pub use sink::{DisconnectReason, Sink, SinkFactory, Transport};
pub use sinks::SinkId;
