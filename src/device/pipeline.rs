//! Pipeline-backed device factory
//!
//! Binds one URL scheme to a [`Driver`]. Requests are validated and planned
//! into a subscription chain when the provider is built, so a bad parameter
//! fails `subscribe` synchronously before any registry state exists.

use std::fmt;
use std::rc::Rc;

use super::driver::{spawn_pump, Driver};
use super::error::DeviceError;
use super::factory::{DeviceFactory, DeviceProvider};
use crate::dist::{PendingSink, SinkFactory};
use crate::registry::{SubscriptionPlan, SubscriptionRegistry};
use crate::url::{self, Url, UrlError};

/// Serves `scheme:` requests from a driver through the shared registry
pub struct PipelineFactory {
    scheme: String,
    driver: Rc<dyn Driver>,
    registry: SubscriptionRegistry,
    cacheable: bool,
}

impl PipelineFactory {
    /// Create a factory for `scheme`; the scheme must be a valid URL scheme token
    pub fn new(
        scheme: &str,
        driver: Rc<dyn Driver>,
        registry: SubscriptionRegistry,
    ) -> Result<Self, UrlError> {
        url::validate_scheme(scheme)?;
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            driver,
            registry,
            cacheable: true,
        })
    }

    /// Mark providers from this factory as not reusable
    pub fn uncacheable(mut self) -> Self {
        self.cacheable = false;
        self
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }
}

impl DeviceFactory for PipelineFactory {
    fn name(&self) -> &str {
        &self.scheme
    }

    fn supports(&self, url: &Url) -> bool {
        url.scheme == self.scheme
    }

    fn cacheable(&self) -> bool {
        self.cacheable
    }

    fn build_provider(&self, request: &str) -> Result<Rc<dyn DeviceProvider>, DeviceError> {
        let plan = SubscriptionPlan::parse(request)?;
        if plan.scheme != self.scheme {
            return Err(DeviceError::NotSupported(request.to_string()));
        }

        tracing::debug!(
            request = %request,
            key = %plan.key(),
            stages = plan.stages.len(),
            "Subscription planned"
        );

        Ok(Rc::new(PipelineProvider {
            plan,
            registry: self.registry.clone(),
            driver: Rc::clone(&self.driver),
        }))
    }
}

impl fmt::Debug for PipelineFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineFactory")
            .field("scheme", &self.scheme)
            .field("driver", &self.driver.name())
            .field("cacheable", &self.cacheable)
            .finish()
    }
}

/// Planned request bound to its driver
pub struct PipelineProvider {
    plan: SubscriptionPlan,
    registry: SubscriptionRegistry,
    driver: Rc<dyn Driver>,
}

impl PipelineProvider {
    pub fn plan(&self) -> &SubscriptionPlan {
        &self.plan
    }
}

impl DeviceProvider for PipelineProvider {
    fn subscribe(&self, factory: Rc<dyn SinkFactory>) -> PendingSink {
        let driver = &self.driver;
        let source = &self.plan.path;
        self.registry.subscribe(
            &self.plan,
            |node| {
                tracing::debug!(key = %node.key(), driver = %driver.name(), "Connecting to source");
                spawn_pump(node, driver.connect(source));
            },
            factory,
        )
    }

    fn key(&self) -> &str {
        self.plan.key()
    }
}
