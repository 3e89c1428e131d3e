// In-memory lease manager
//
// One LeaseTable stands in for the shared store; each process gets its own
// InMemoryLeaseManager bound to a holder identity.
use drover_core::error::Result;
use drover_core::port::{LeaseManager, TimeProvider};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
struct LeaseRecord {
    holder: String,
    expires_at_ms: i64,
}

/// Shared lease store with TTL expiry
pub struct LeaseTable {
    leases: Mutex<HashMap<String, LeaseRecord>>,
    time_provider: Arc<dyn TimeProvider>,
    ttl_ms: i64,
}

impl LeaseTable {
    pub fn new(time_provider: Arc<dyn TimeProvider>, ttl: Duration) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            time_provider,
            ttl_ms: ttl.as_millis() as i64,
        }
    }

    /// Current unexpired holder of `lease`
    pub fn holder_of(&self, lease: &str) -> Option<String> {
        let now = self.time_provider.now_millis();
        self.leases
            .lock()
            .unwrap()
            .get(lease)
            .filter(|record| record.expires_at_ms > now)
            .map(|record| record.holder.clone())
    }

    /// Unexpired leases held by `holder`
    pub fn held_by(&self, holder: &str) -> usize {
        let now = self.time_provider.now_millis();
        self.leases
            .lock()
            .unwrap()
            .values()
            .filter(|record| record.holder == holder && record.expires_at_ms > now)
            .count()
    }

    /// Force `holder` onto `lease`, overriding any current holder
    pub fn grant(&self, lease: &str, holder: &str) {
        let expires_at_ms = self.time_provider.now_millis() + self.ttl_ms;
        self.leases.lock().unwrap().insert(
            lease.to_string(),
            LeaseRecord {
                holder: holder.to_string(),
                expires_at_ms,
            },
        );
    }

    fn try_acquire(&self, lease: &str, holder: &str) -> bool {
        let now = self.time_provider.now_millis();
        let mut leases = self.leases.lock().unwrap();
        let free = match leases.get(lease) {
            Some(record) => record.holder == holder || record.expires_at_ms <= now,
            None => true,
        };
        if free {
            leases.insert(
                lease.to_string(),
                LeaseRecord {
                    holder: holder.to_string(),
                    expires_at_ms: now + self.ttl_ms,
                },
            );
        }
        free
    }

    fn release(&self, lease: &str, holder: &str) {
        let mut leases = self.leases.lock().unwrap();
        if leases.get(lease).is_some_and(|record| record.holder == holder) {
            leases.remove(lease);
        }
    }
}

pub struct InMemoryLeaseManager {
    table: Arc<LeaseTable>,
    holder: String,
}

impl InMemoryLeaseManager {
    pub fn new(table: Arc<LeaseTable>, holder: impl Into<String>) -> Self {
        Self {
            table,
            holder: holder.into(),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }
}

#[async_trait]
impl LeaseManager for InMemoryLeaseManager {
    async fn try_acquire(&self, lease_name: &str) -> Result<bool> {
        let acquired = self.table.try_acquire(lease_name, &self.holder);
        debug!(lease = %lease_name, holder = %self.holder, acquired, "Lease acquire");
        Ok(acquired)
    }

    async fn is_held_by_other(&self, lease_name: &str) -> Result<bool> {
        Ok(self
            .table
            .holder_of(lease_name)
            .is_some_and(|holder| holder != self.holder))
    }

    async fn release(&self, lease_name: &str) -> Result<()> {
        self.table.release(lease_name, &self.holder);
        Ok(())
    }
}
