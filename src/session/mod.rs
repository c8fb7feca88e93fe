//! Front-end sessions
//!
//! A session is one connected client: the requests it sends, the
//! subscriptions those requests hold, and the reply lines they produce.

pub mod context;
pub mod request;
pub mod state;

pub use context::SessionContext;
pub use request::{Action, Request};
pub use state::{data_line, error_line, ClientSession, Outbound, SessionPhase};
