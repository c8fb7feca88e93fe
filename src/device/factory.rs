//! Backend contracts

use std::rc::Rc;

use super::error::DeviceError;
use crate::dist::{PendingSink, SinkFactory};
use crate::url::Url;

/// Serves subscriptions for one resolved request
pub trait DeviceProvider {
    /// Attach a sink built by `factory`; resolves once the chain is connected
    fn subscribe(&self, factory: Rc<dyn SinkFactory>) -> PendingSink;

    /// Canonical key the provider serves
    fn key(&self) -> &str;
}

/// Turns request URLs into providers for one family of backends
pub trait DeviceFactory {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Cheap pre-check; `build_provider` may still refuse with `NotSupported`
    fn supports(&self, url: &Url) -> bool;

    /// Whether a provider built for a request may be reused for the same request
    fn cacheable(&self) -> bool {
        true
    }

    /// Validate `request` and build its provider
    fn build_provider(&self, request: &str) -> Result<Rc<dyn DeviceProvider>, DeviceError>;
}
