// Lease Manager Port
// Backed by any consistent key-value store with TTL support

use crate::error::Result;
use async_trait::async_trait;

/// Distributed lease manager, as seen by one pod
///
/// "Other" means any holder identity except this process's.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LeaseManager: Send + Sync {
    /// Acquire the named lease, or renew it if this process already holds it
    async fn try_acquire(&self, lease_name: &str) -> Result<bool>;

    /// True if an unexpired lease is held by a different process
    async fn is_held_by_other(&self, lease_name: &str) -> Result<bool>;

    /// Release the lease if this process holds it
    async fn release(&self, lease_name: &str) -> Result<()>;
}
