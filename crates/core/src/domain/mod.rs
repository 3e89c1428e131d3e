// Domain Layer - Pure queue, message and allocation models

pub mod allocation;
pub mod dead_letter;
pub mod error;
pub mod metadata;
pub mod queue;

// Re-exports
pub use allocation::{AllocationPolicy, ConsumerAllocation};
pub use dead_letter::DeadLetterQueuePolicy;
pub use error::DomainError;
pub use metadata::{JobMetadata, RawMessage};
pub use queue::{QueueName, DEAD_LETTER_SUFFIX, RETRY_SUFFIX};

/// Largest batch a single receive or batch send may carry (SQS limit)
pub const MAX_BATCH_SIZE: usize = 10;
