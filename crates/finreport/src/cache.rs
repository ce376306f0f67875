//! TTL key-value cache for query results.
//!
//! Keys are namespaced strings (`entities:list:...`); pattern deletes use
//! glob syntax so a whole namespace can be dropped at once.

use std::time::Duration;

use moka::sync::Cache;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::CacheConfig;

#[derive(Clone)]
pub struct QueryCache {
    inner: Cache<String, serde_json::Value>,
}

impl QueryCache {
    pub fn new(config: &CacheConfig) -> Self {
        let inner = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .build();
        Self { inner }
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.get(key)
    }

    /// Typed read. A value that no longer matches `T` counts as a miss.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.inner.get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                log::debug!("Discarding cache entry '{}': {}", key, e);
                self.inner.invalidate(key);
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: serde_json::Value) {
        self.inner.insert(key.to_string(), value);
    }

    pub fn set_as<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => self.set(key, v),
            Err(e) => log::warn!("Not caching '{}': {}", key, e),
        }
    }

    pub fn delete(&self, key: &str) {
        self.inner.invalidate(key);
    }

    /// Deletes every key matching the glob `pattern` (e.g. `entities:*`).
    /// Returns the number of keys removed.
    pub fn delete_pattern(&self, pattern: &str) -> usize {
        let matcher = match glob::Pattern::new(pattern) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("Invalid cache key pattern '{}': {}", pattern, e);
                return 0;
            }
        };

        let keys: Vec<String> = self
            .inner
            .iter()
            .filter(|(key, _)| matcher.matches(key))
            .map(|(key, _)| key.to_string())
            .collect();
        for key in &keys {
            self.inner.invalidate(key);
        }
        keys.len()
    }
}
