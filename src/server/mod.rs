//! Line-protocol TCP front-end
//!
//! Clients send `SUB <url>`, `GET <url>` or `UNSUB <url>`, one per line, and
//! receive one JSON object per line in return.

pub mod config;
pub mod connection;
pub mod listener;

pub use config::{ServerConfig, DEFAULT_PORT};
pub use listener::BrokerServer;
