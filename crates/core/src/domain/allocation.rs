// Consumer Allocation Domain Model

use serde::{Deserialize, Serialize};

/// How a pod turns capacity knobs into a receiver count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    /// A fixed per-pod count wins; otherwise whatever fleet capacity is free
    #[default]
    OneFlagOnly,
    /// Free fleet capacity, capped by an explicit per-pod ceiling
    BalancedMax,
}

/// Result of one allocation decision for one queue on this pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerAllocation {
    /// Receivers this pod should run
    pub consumers: usize,
    /// Lease slots `1..=n` backing the decision; None when leases were not consulted
    pub lease_slots: Option<usize>,
}

impl ConsumerAllocation {
    pub fn none() -> Self {
        Self {
            consumers: 0,
            lease_slots: None,
        }
    }

    pub fn fixed(consumers: usize) -> Self {
        Self {
            consumers,
            lease_slots: None,
        }
    }

    pub fn leased(consumers: usize, lease_slots: usize) -> Self {
        Self {
            consumers,
            lease_slots: Some(lease_slots),
        }
    }
}
