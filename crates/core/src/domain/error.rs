// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid queue name: '{0}'")]
    InvalidQueueName(String),

    #[error("Invalid batch size: {0} (must be 1..={})", crate::domain::MAX_BATCH_SIZE)]
    InvalidBatchSize(usize),

    #[error("Reserved attribute name: {0}")]
    ReservedAttribute(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
