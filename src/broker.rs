//! Broker facade
//!
//! Ties the device manager to the subscription registry. Everything a
//! front-end needs is here: register drivers, subscribe with a sink factory,
//! inspect or tear down live subscriptions.

use std::cell::RefCell;
use std::rc::Rc;

use crate::device::{
    DeviceError, DeviceFactory, DeviceManager, DeviceProvider, Driver, PipelineFactory,
};
use crate::dist::{PendingSink, SinkFactory};
use crate::registry::{RegistryConfig, SubscriptionRegistry};
use crate::url::UrlError;

/// Subscription broker
///
/// Single-threaded: keep it in an `Rc` on the thread running the
/// `LocalSet`.
///
/// # Example
/// ```no_run
/// use std::rc::Rc;
/// use pvbroker::device::SimulatedDriver;
/// use pvbroker::dist::{Sink, SinkFactory};
/// use pvbroker::event::ValueEvent;
/// use pvbroker::Broker;
///
/// struct Print;
///
/// impl Sink for Print {
///     fn data_received(&mut self, event: &ValueEvent) {
///         println!("{}", event);
///     }
/// }
///
/// # async fn example() -> pvbroker::Result<()> {
/// let broker = Broker::new();
/// broker.add_driver("sim", Rc::new(SimulatedDriver::new()))?;
///
/// let factory: Rc<dyn SinkFactory> = Rc::new(|_: &str| Box::new(Print) as Box<dyn Sink>);
/// let handle = broker.subscribe("sim:sine?rate=1&precision=2", factory)?.await?;
/// # let _ = handle;
/// # Ok(())
/// # }
/// ```
pub struct Broker {
    manager: RefCell<DeviceManager>,
    registry: SubscriptionRegistry,
}

impl Broker {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            manager: RefCell::new(DeviceManager::new(config.provider_cache_capacity)),
            registry: SubscriptionRegistry::with_config(config),
        }
    }

    /// The shared subscription registry
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Serve `scheme:` requests from `driver`
    ///
    /// Returns the registered factory so it can be removed later.
    pub fn add_driver(
        &self,
        scheme: &str,
        driver: Rc<dyn Driver>,
    ) -> Result<Rc<dyn DeviceFactory>, UrlError> {
        let factory: Rc<dyn DeviceFactory> =
            Rc::new(PipelineFactory::new(scheme, driver, self.registry.clone())?);
        self.add_factory(Rc::clone(&factory));
        tracing::info!(scheme = %scheme, "Driver registered");
        Ok(factory)
    }

    pub fn add_factory(&self, factory: Rc<dyn DeviceFactory>) -> bool {
        self.manager.borrow_mut().add_factory(factory)
    }

    pub fn remove_factory(&self, factory: &Rc<dyn DeviceFactory>) -> bool {
        self.manager.borrow_mut().remove_factory(factory)
    }

    /// Names of the registered factories, in resolution order
    pub fn factories(&self) -> Vec<String> {
        self.manager.borrow().factories()
    }

    /// Provider serving `request`
    pub fn resolve(&self, request: &str) -> Result<Rc<dyn DeviceProvider>, DeviceError> {
        self.manager.borrow_mut().resolve(request)
    }

    /// Subscribe a sink built by `factory` to `request`
    ///
    /// Routing and validation errors are returned immediately and leave no
    /// state behind. Everything after that is reported through the returned
    /// [`PendingSink`].
    pub fn subscribe(
        &self,
        request: &str,
        factory: Rc<dyn SinkFactory>,
    ) -> Result<PendingSink, DeviceError> {
        let provider = self.resolve(request)?;
        tracing::debug!(request = %request, key = %provider.key(), "Subscribe");
        Ok(provider.subscribe(factory))
    }

    /// Release every subscription and forget cached providers
    pub fn shutdown(&self) {
        self.registry.release_all();
        self.manager.borrow_mut().clear_cache();
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}
