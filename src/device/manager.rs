//! Device manager
//!
//! Routes a request to the first registered factory that accepts it and
//! memoizes the resulting provider in an LRU cache keyed by the exact
//! request string.

use std::num::NonZeroUsize;
use std::rc::Rc;

use lru::LruCache;

use super::error::DeviceError;
use super::factory::{DeviceFactory, DeviceProvider};
use crate::registry::ValidationError;
use crate::url::Url;

/// Default number of cached providers
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Ordered set of device factories with a provider cache
pub struct DeviceManager {
    factories: Vec<Rc<dyn DeviceFactory>>,
    cache: Option<LruCache<String, Rc<dyn DeviceProvider>>>,
}

impl DeviceManager {
    /// Create a manager caching up to `capacity` providers (0 disables the cache)
    pub fn new(capacity: usize) -> Self {
        Self {
            factories: Vec::new(),
            cache: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    /// Append a factory; returns false if it was already registered
    pub fn add_factory(&mut self, factory: Rc<dyn DeviceFactory>) -> bool {
        if self.factories.iter().any(|f| same_factory(f, &factory)) {
            tracing::debug!(factory = %factory.name(), "Device factory already registered");
            return false;
        }
        tracing::debug!(factory = %factory.name(), "Device factory registered");
        self.factories.push(factory);
        true
    }

    /// Remove a factory and drop every cached provider
    pub fn remove_factory(&mut self, factory: &Rc<dyn DeviceFactory>) -> bool {
        let before = self.factories.len();
        self.factories.retain(|f| !same_factory(f, factory));
        if self.factories.len() == before {
            tracing::warn!(factory = %factory.name(), "Device factory not registered");
            return false;
        }
        tracing::debug!(factory = %factory.name(), "Device factory removed");
        self.clear_cache();
        true
    }

    /// Names of the registered factories, in resolution order
    pub fn factories(&self) -> Vec<String> {
        self.factories.iter().map(|f| f.name().to_string()).collect()
    }

    /// True when every registered factory is cacheable
    pub fn cacheable(&self) -> bool {
        self.factories.iter().all(|f| f.cacheable())
    }

    pub fn cached_len(&self) -> usize {
        self.cache.as_ref().map_or(0, LruCache::len)
    }

    pub fn clear_cache(&mut self) {
        if let Some(cache) = self.cache.as_mut() {
            cache.clear();
        }
    }

    /// Find or build the provider for `request`
    ///
    /// Factories are consulted in registration order. `NotSupported` moves
    /// on to the next one; any other error is returned as is. The provider
    /// is cached only if every factory consulted on the way was cacheable.
    pub fn resolve(&mut self, request: &str) -> Result<Rc<dyn DeviceProvider>, DeviceError> {
        if let Some(provider) = self.cache.as_mut().and_then(|c| c.get(request)) {
            tracing::trace!(request = %request, "Provider cache hit");
            return Ok(Rc::clone(provider));
        }

        let url = Url::parse(request).map_err(ValidationError::from)?;

        let mut cacheable = true;
        for factory in &self.factories {
            if !factory.supports(&url) {
                continue;
            }
            cacheable &= factory.cacheable();

            match factory.build_provider(request) {
                Ok(provider) => {
                    match self.cache.as_mut() {
                        Some(cache) if cacheable => {
                            cache.put(request.to_string(), Rc::clone(&provider));
                            tracing::trace!(
                                request = %request,
                                factory = %factory.name(),
                                cached = cache.len(),
                                "Provider built and cached"
                            );
                        }
                        _ => tracing::trace!(
                            request = %request,
                            factory = %factory.name(),
                            "Provider built"
                        ),
                    }
                    return Ok(provider);
                }
                Err(err) if err.is_not_supported() => {
                    tracing::trace!(factory = %factory.name(), "Factory declined request");
                }
                Err(err) => {
                    tracing::debug!(
                        request = %request,
                        factory = %factory.name(),
                        error = %err,
                        "Provider rejected"
                    );
                    return Err(err);
                }
            }
        }

        Err(DeviceError::NotSupported(request.to_string()))
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

fn same_factory(a: &Rc<dyn DeviceFactory>, b: &Rc<dyn DeviceFactory>) -> bool {
    std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
}
