//! Registry configuration

/// Subscription and device registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Providers kept in the device manager's LRU cache (0 = no caching)
    pub provider_cache_capacity: usize,

    /// Maximum live subscriptions, counting every stage (0 = unlimited)
    pub max_subscriptions: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            provider_cache_capacity: 1000,
            max_subscriptions: 0, // Unlimited
        }
    }
}

impl RegistryConfig {
    /// Set the provider cache capacity
    pub fn provider_cache_capacity(mut self, capacity: usize) -> Self {
        self.provider_cache_capacity = capacity;
        self
    }

    /// Disable provider caching
    pub fn disable_provider_cache(mut self) -> Self {
        self.provider_cache_capacity = 0;
        self
    }

    /// Set the subscription limit
    pub fn max_subscriptions(mut self, max: usize) -> Self {
        self.max_subscriptions = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();

        assert_eq!(config.provider_cache_capacity, 1000);
        assert_eq!(config.max_subscriptions, 0);
    }

    #[test]
    fn test_builder_chaining() {
        let config = RegistryConfig::default()
            .provider_cache_capacity(16)
            .max_subscriptions(64);

        assert_eq!(config.provider_cache_capacity, 16);
        assert_eq!(config.max_subscriptions, 64);
    }

    #[test]
    fn test_disable_provider_cache() {
        let config = RegistryConfig::default().disable_provider_cache();

        assert_eq!(config.provider_cache_capacity, 0);
    }
}
