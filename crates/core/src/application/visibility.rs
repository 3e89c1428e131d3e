// Visibility backoff for retried jobs
use super::constants::MAX_VISIBILITY_TIMEOUT_SECS;
use tracing::debug;

/// Computes how long a job should stay invisible before its next delivery
///
/// Backoff formula:
/// timeout = base * 2^(receive_count - 1), capped at 12 hours
pub struct VisibilityTimeoutCalculator {
    base_secs: u32,
}

impl VisibilityTimeoutCalculator {
    /// Create a calculator
    ///
    /// # Arguments
    /// * `base_secs` - Visibility applied after the first delivery
    ///
    /// # Example
    /// ```text
    /// let calc = VisibilityTimeoutCalculator::new(30);
    /// assert_eq!(calc.timeout_for(3), 120);
    /// ```
    pub fn new(base_secs: u32) -> Self {
        Self {
            base_secs: base_secs.max(1),
        }
    }

    /// Visibility timeout in seconds for a message delivered `receive_count` times
    ///
    /// A missing or zero count is treated as a first delivery.
    pub fn timeout_for(&self, receive_count: u32) -> u32 {
        let exponent = receive_count.saturating_sub(1).min(31);
        let timeout = (self.base_secs as u64)
            .saturating_mul(1u64 << exponent)
            .min(MAX_VISIBILITY_TIMEOUT_SECS as u64) as u32;

        debug!(
            receive_count = %receive_count,
            timeout_secs = %timeout,
            "Computed visibility backoff"
        );
        timeout
    }
}
