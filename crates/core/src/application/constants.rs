// Consumer constants (No magic values)
use std::time::Duration;

/// Fleet-wide receivers allowed for a queue
pub const CONSUMERS_PER_QUEUE: &str = "jobqueue-consumers";

/// Fixed receivers per pod (-1 = unset)
pub const POD_CONSUMERS_PER_QUEUE: &str = "pod-jobqueue-consumers";

/// Per-pod receiver ceiling (<= 0 = unset)
pub const POD_MAX_JOBQUEUE_CONSUMERS: &str = "pod-max-jobqueue-consumers";

/// Messages requested per receive call
pub const CONSUMERS_BATCH_SIZE: &str = "jobqueue-consumers-fetch-batch-size";

/// Long-poll wait for the last queue of a receiver, seconds
pub const CONSUMERS_RECEIVE_WAIT_TIME: &str = "jobqueue-consumers-receive-wait-time";

/// How long a batch receiver keeps gathering before handing off, seconds
pub const CONSUMERS_BATCH_WAIT_TIME: &str = "jobqueue-consumers-batch-wait-time";

/// Switch key consulted before every poll
pub const CONSUMER_SWITCH_KEY: &str = "sqs";

/// SQS rejects long polls over 20 seconds
pub const MAX_RECEIVE_WAIT_SECS: u32 = 20;

/// Flag value meaning "not configured"
pub const UNSET: i64 = -1;

/// Default fleet-wide receivers when the flag service has no value
pub const DEFAULT_CONSUMERS_PER_QUEUE: i64 = 1;

/// Lease name prefix; full name is `<prefix>-<queue>-<slot>`
pub const CONSUMER_LEASE_PREFIX: &str = "sqs-job-consumer";

/// SQS caps visibility timeouts at 12 hours
pub const MAX_VISIBILITY_TIMEOUT_SECS: u32 = 43_200;

/// How long `shutdown` waits for receivers to drain before giving up
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub fn consumer_lease_name(queue: &str, slot: usize) -> String {
    format!("{}-{}-{}", CONSUMER_LEASE_PREFIX, queue, slot)
}
