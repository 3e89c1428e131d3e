// Central Error Type for the Job Queue

use thiserror::Error;

/// Application-level error type
///
/// Variants follow the consumer failure taxonomy: transient backend
/// failures, per-job handler failures, metadata and allocation problems
/// that degrade gracefully, and resolution failures that surface to callers.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Handler failure: {0}")]
    HandlerFailure(String),

    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("Allocation misconfigured: {0}")]
    AllocationMisconfigured(String),

    #[error("Queue resolution failed: {0}")]
    ResolutionFailure(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Transient errors are expected to clear on a later poll tick or redelivery
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::BackendUnavailable(_))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
