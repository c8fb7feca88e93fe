//! Device layer
//!
//! Routes request URLs to backends. A [`DeviceManager`] holds an ordered list
//! of [`DeviceFactory`] implementations; the first one that supports a
//! request builds a [`DeviceProvider`] for it. The stock factory,
//! [`PipelineFactory`], binds a scheme to a [`Driver`] and composes the
//! request's stage chain in the shared subscription registry.

pub mod driver;
pub mod error;
pub mod factory;
pub mod manager;
pub mod pipeline;
pub mod publisher;
pub mod simulated;

pub use driver::{Driver, DriverConnection, ManualDriver};
pub use error::DeviceError;
pub use factory::{DeviceFactory, DeviceProvider};
pub use manager::{DeviceManager, DEFAULT_CACHE_CAPACITY};
pub use pipeline::{PipelineFactory, PipelineProvider};
pub use publisher::{DriverEvent, DriverPublisher};
pub use simulated::{SimulatedDriver, Waveform};
