//! Node, registry and session statistics

pub mod metrics;

pub use metrics::{NodeStats, RegistryStats, SessionStats};
