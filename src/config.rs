//! Cache configuration (§6.3).

use crate::keys::KeyRegistry;
use crate::ops::CachePolicy;
use crate::transport::Transport;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// The scalar subset of configuration, deserializable on its own so a
/// host application can load it from its usual config file/env layer
/// alongside the programmatic pieces (`keys`, `interfaces`, `transport`)
/// that cannot round-trip through serde.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalarConfig {
    #[serde(default = "default_hydration_timeout_ms")]
    pub hydration_timeout_ms: u64,
    #[serde(default = "default_suspension_timeout_ms")]
    pub suspension_timeout_ms: u64,
    #[serde(default)]
    pub cache_policy: DefaultCachePolicy,
}

impl Default for ScalarConfig {
    fn default() -> Self {
        Self {
            hydration_timeout_ms: default_hydration_timeout_ms(),
            suspension_timeout_ms: default_suspension_timeout_ms(),
            cache_policy: DefaultCachePolicy::default(),
        }
    }
}

fn default_hydration_timeout_ms() -> u64 {
    100
}

fn default_suspension_timeout_ms() -> u64 {
    1000
}

/// A serde-friendly mirror of [`CachePolicy`] (§6.3's default is
/// `network-only`, unlike a per-operation call which defaults to
/// `cache-first` per §4.6's decision table framing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefaultCachePolicy {
    CacheOnly,
    CacheFirst,
    CacheAndNetwork,
    NetworkOnly,
}

impl Default for DefaultCachePolicy {
    fn default() -> Self {
        DefaultCachePolicy::NetworkOnly
    }
}

impl From<DefaultCachePolicy> for CachePolicy {
    fn from(value: DefaultCachePolicy) -> Self {
        match value {
            DefaultCachePolicy::CacheOnly => CachePolicy::CacheOnly,
            DefaultCachePolicy::CacheFirst => CachePolicy::CacheFirst,
            DefaultCachePolicy::CacheAndNetwork => CachePolicy::CacheAndNetwork,
            DefaultCachePolicy::NetworkOnly => CachePolicy::NetworkOnly,
        }
    }
}

/// Full cache configuration (§6.3). `keys`/`interfaces` are folded
/// directly into a [`KeyRegistry`] rather than kept as a separate map,
/// since that registry is exactly the runtime structure §3.1's fallback
/// precedence needs.
pub struct CacheConfig {
    pub scalars: ScalarConfig,
    pub keys: KeyRegistry,
    pub transport: Arc<dyn Transport>,
}

impl CacheConfig {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            scalars: ScalarConfig::default(),
            keys: KeyRegistry::new(),
            transport,
        }
    }

    pub fn with_scalars(mut self, scalars: ScalarConfig) -> Self {
        self.scalars = scalars;
        self
    }

    pub fn with_keys(mut self, keys: KeyRegistry) -> Self {
        self.keys = keys;
        self
    }

    pub fn hydration_timeout(&self) -> Duration {
        Duration::from_millis(self.scalars.hydration_timeout_ms)
    }

    pub fn suspension_timeout(&self) -> Duration {
        Duration::from_millis(self.scalars.suspension_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_config_defaults_match_the_documented_values() {
        let config = ScalarConfig::default();
        assert_eq!(config.hydration_timeout_ms, 100);
        assert_eq!(config.suspension_timeout_ms, 1000);
        assert_eq!(config.cache_policy, DefaultCachePolicy::NetworkOnly);
    }

    #[test]
    fn parses_from_camel_case_json() {
        let config: ScalarConfig = serde_json::from_str(r#"{"hydrationTimeoutMs":50,"suspensionTimeoutMs":200,"cachePolicy":"cache-first"}"#).unwrap();
        assert_eq!(config.hydration_timeout_ms, 50);
        assert_eq!(config.suspension_timeout_ms, 200);
        assert_eq!(config.cache_policy, DefaultCachePolicy::CacheFirst);
    }
}
