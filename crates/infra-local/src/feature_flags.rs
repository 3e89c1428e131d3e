// In-memory feature flags
use drover_core::port::FeatureFlags;
use std::collections::HashMap;
use std::sync::RwLock;

/// Flags set in process; a per-key value wins over the feature-wide one
#[derive(Debug, Default)]
pub struct InMemoryFeatureFlags {
    global: RwLock<HashMap<String, i64>>,
    scoped: RwLock<HashMap<(String, String), i64>>,
}

impl InMemoryFeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `feature` for every key
    pub fn set(&self, feature: &str, value: i64) {
        self.global
            .write()
            .unwrap()
            .insert(feature.to_string(), value);
    }

    /// Set `feature` for one key (queue name) only
    pub fn set_for(&self, feature: &str, key: &str, value: i64) {
        self.scoped
            .write()
            .unwrap()
            .insert((feature.to_string(), key.to_string()), value);
    }

    pub fn clear(&self) {
        self.global.write().unwrap().clear();
        self.scoped.write().unwrap().clear();
    }
}

impl FeatureFlags for InMemoryFeatureFlags {
    fn get_int(&self, feature: &str, key: &str, default: i64) -> i64 {
        if let Some(value) = self
            .scoped
            .read()
            .unwrap()
            .get(&(feature.to_string(), key.to_string()))
        {
            return *value;
        }
        self.global
            .read()
            .unwrap()
            .get(feature)
            .copied()
            .unwrap_or(default)
    }
}
