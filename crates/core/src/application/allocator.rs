// Consumer Allocator - fleet-wide receiver capacity via feature flags and leases
use super::constants::{
    consumer_lease_name, CONSUMERS_PER_QUEUE, DEFAULT_CONSUMERS_PER_QUEUE,
    POD_CONSUMERS_PER_QUEUE, POD_MAX_JOBQUEUE_CONSUMERS, UNSET,
};
use super::flags::FlagCache;
use crate::domain::{AllocationPolicy, ConsumerAllocation, QueueName};
use crate::error::{AppError, Result};
use crate::port::LeaseManager;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decides how many receivers this pod runs for a queue
///
/// Decisions are advisory: two pods deciding at once may transiently
/// over- or under-allocate, which the next decision corrects. Flags are
/// re-read (through the cache) on every decision.
pub struct ConsumerAllocator {
    flags: Arc<FlagCache>,
    leases: Arc<dyn LeaseManager>,
}

impl ConsumerAllocator {
    pub fn new(flags: Arc<FlagCache>, leases: Arc<dyn LeaseManager>) -> Self {
        Self { flags, leases }
    }

    /// Receivers allowed for `queue` across the whole fleet
    pub fn global_max(&self, queue: &QueueName) -> usize {
        self.flags
            .get_int(CONSUMERS_PER_QUEUE, queue.as_str(), DEFAULT_CONSUMERS_PER_QUEUE)
            .max(0) as usize
    }

    pub async fn compute_sqs_consumers_for_pod(
        &self,
        queue: &QueueName,
        policy: AllocationPolicy,
    ) -> Result<usize> {
        Ok(self.decide(queue, policy).await?.consumers)
    }

    /// Full allocation decision, including the lease slot range consulted
    pub async fn decide(
        &self,
        queue: &QueueName,
        policy: AllocationPolicy,
    ) -> Result<ConsumerAllocation> {
        let global_max = self.global_max(queue);

        match policy {
            AllocationPolicy::OneFlagOnly => {
                let pod_fixed = self
                    .flags
                    .get_int(POD_CONSUMERS_PER_QUEUE, queue.as_str(), UNSET);
                if pod_fixed >= 0 {
                    return Ok(ConsumerAllocation::fixed(pod_fixed as usize));
                }
                let available = self.available(queue, global_max).await?;
                Ok(ConsumerAllocation::leased(available, global_max))
            }
            AllocationPolicy::BalancedMax => {
                let pod_ceiling = self
                    .flags
                    .get_int(POD_MAX_JOBQUEUE_CONSUMERS, queue.as_str(), UNSET);
                if pod_ceiling <= 0 {
                    debug!(
                        queue = %queue,
                        reason = %AppError::AllocationMisconfigured(format!(
                            "{} is {}", POD_MAX_JOBQUEUE_CONSUMERS, pod_ceiling
                        )),
                        "No receivers allocated"
                    );
                    return Ok(ConsumerAllocation::none());
                }
                let available = self.available(queue, global_max).await?;
                Ok(ConsumerAllocation::leased(
                    available.min(pod_ceiling as usize),
                    global_max,
                ))
            }
        }
    }

    /// Count slots `1..=global_max` whose lease is held by another pod
    pub async fn leases_held_by_others(&self, queue: &QueueName, global_max: usize) -> Result<usize> {
        let mut held = 0;
        for slot in 1..=global_max {
            let lease = consumer_lease_name(queue.as_str(), slot);
            if self.leases.is_held_by_other(&lease).await? {
                held += 1;
            }
        }
        Ok(held)
    }

    /// Bring the set of slots this pod holds to `wanted`
    ///
    /// Renews every held slot, forgets the ones lost to another pod or
    /// outside `1..=global_max`, releases the surplus, then acquires free
    /// slots in ascending order. Returns the number of slots held afterwards.
    pub async fn acquire_slots(
        &self,
        queue: &QueueName,
        wanted: usize,
        global_max: usize,
        held: &mut BTreeSet<usize>,
    ) -> Result<usize> {
        let out_of_range: Vec<usize> = held.range(global_max + 1..).copied().collect();
        for slot in out_of_range {
            self.release_slot(queue, slot).await;
            held.remove(&slot);
        }

        for slot in held.clone() {
            let lease = consumer_lease_name(queue.as_str(), slot);
            if !self.leases.try_acquire(&lease).await? {
                info!(queue = %queue, lease = %lease, "Consumer lease lost");
                held.remove(&slot);
            }
        }

        while held.len() > wanted {
            let Some(slot) = held.iter().next_back().copied() else {
                break;
            };
            self.release_slot(queue, slot).await;
            held.remove(&slot);
        }

        for slot in 1..=global_max {
            if held.len() >= wanted {
                break;
            }
            if held.contains(&slot) {
                continue;
            }
            let lease = consumer_lease_name(queue.as_str(), slot);
            if self.leases.try_acquire(&lease).await? {
                debug!(queue = %queue, lease = %lease, "Consumer lease acquired");
                held.insert(slot);
            }
        }

        Ok(held.len())
    }

    /// Release every held slot; failures are logged, the slots forgotten
    pub async fn release_all(&self, queue: &QueueName, held: &mut BTreeSet<usize>) {
        for slot in std::mem::take(held) {
            self.release_slot(queue, slot).await;
        }
    }

    async fn available(&self, queue: &QueueName, global_max: usize) -> Result<usize> {
        let others = self.leases_held_by_others(queue, global_max).await?;
        Ok(global_max.saturating_sub(others))
    }

    async fn release_slot(&self, queue: &QueueName, slot: usize) {
        let lease = consumer_lease_name(queue.as_str(), slot);
        if let Err(e) = self.leases.release(&lease).await {
            warn!(queue = %queue, lease = %lease, error = %e, "Failed to release consumer lease");
        }
    }
}
