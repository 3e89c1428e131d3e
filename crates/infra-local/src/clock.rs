// Manual clock for deterministic visibility and lease expiry
use drover_core::port::TimeProvider;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Time only moves when told to
#[derive(Debug)]
pub struct ManualTimeProvider {
    now_ms: AtomicI64,
}

impl ManualTimeProvider {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Default for ManualTimeProvider {
    fn default() -> Self {
        Self::new(1_700_000_000_000)
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
