// In-memory async switch
use drover_core::port::AsyncSwitch;
use std::collections::HashSet;
use std::sync::RwLock;

/// Switch flipped in process; every key starts enabled
#[derive(Debug, Default)]
pub struct InMemorySwitch {
    disabled: RwLock<HashSet<String>>,
}

impl InMemorySwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disable(&self, key: &str) {
        self.disabled.write().unwrap().insert(key.to_string());
    }

    pub fn enable(&self, key: &str) {
        self.disabled.write().unwrap().remove(key);
    }
}

impl AsyncSwitch for InMemorySwitch {
    fn is_enabled(&self, key: &str) -> bool {
        !self.disabled.read().unwrap().contains(key)
    }
}
