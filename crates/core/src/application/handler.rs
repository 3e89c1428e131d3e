// Job Handler - the single-method interface subscribers implement
use super::job::Job;
use crate::error::AppError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Error a handler reports for one job; the job is left for redelivery
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error(transparent)]
    App(#[from] AppError),

    #[error("{0}")]
    Message(String),
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        HandlerError::Message(msg)
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        HandlerError::Message(msg.to_string())
    }
}

pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Processes delivered jobs
///
/// A handler settles a job by calling [`Job::acknowledge`] or
/// [`Job::dead_letter`]. Returning without settling, returning an error or
/// panicking all leave the message to reappear after its visibility timeout.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle_job(&self, job: Arc<Job>) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(Arc<Job>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle_job(&self, job: Arc<Job>) -> HandlerResult {
        (self)(job).await
    }
}

/// Processes a gathered batch of jobs in one call
///
/// Settling is per job, as with [`JobHandler`]. An error or panic leaves
/// every unsettled job of the batch for redelivery.
#[async_trait]
pub trait BatchJobHandler: Send + Sync {
    async fn handle_jobs(&self, jobs: Vec<Arc<Job>>) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> BatchJobHandler for F
where
    F: Fn(Vec<Arc<Job>>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle_jobs(&self, jobs: Vec<Arc<Job>>) -> HandlerResult {
        (self)(jobs).await
    }
}
