// Feature Flag Read-Through Cache
// Bounds flag-service load from the poll loop; TTL 0 reads through every time

use crate::port::{FeatureFlags, TimeProvider};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct CachedFlag {
    value: i64,
    fetched_at_ms: i64,
}

pub struct FlagCache {
    flags: Arc<dyn FeatureFlags>,
    time_provider: Arc<dyn TimeProvider>,
    ttl_ms: i64,
    entries: Mutex<HashMap<(String, String), CachedFlag>>,
}

impl FlagCache {
    pub fn new(
        flags: Arc<dyn FeatureFlags>,
        time_provider: Arc<dyn TimeProvider>,
        ttl: Duration,
    ) -> Self {
        Self {
            flags,
            time_provider,
            ttl_ms: ttl.as_millis() as i64,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Read an integer flag, serving a cached value younger than the TTL
    pub fn get_int(&self, feature: &str, key: &str, default: i64) -> i64 {
        if self.ttl_ms <= 0 {
            return self.flags.get_int(feature, key, default);
        }

        let now = self.time_provider.now_millis();
        let cache_key = (feature.to_string(), key.to_string());
        if let Some(cached) = self.entries.lock().unwrap().get(&cache_key) {
            if now - cached.fetched_at_ms < self.ttl_ms {
                return cached.value;
            }
        }

        // Read outside the lock; a racing reader only costs one extra flag read
        let value = self.flags.get_int(feature, key, default);
        self.entries.lock().unwrap().insert(
            cache_key,
            CachedFlag {
                value,
                fetched_at_ms: now,
            },
        );
        value
    }

    /// Drop every cached value
    pub fn invalidate(&self) {
        self.entries.lock().unwrap().clear();
    }
}
