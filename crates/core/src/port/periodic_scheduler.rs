// Periodic Scheduler Port

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one run of a repeated task; drives the next delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Work was done, run again right away
    Ok,
    /// Nothing to do, back off
    NoWork,
    /// The run failed, back off
    Failed,
    /// Do not run this task again
    NoReschedule,
}

/// A task the scheduler calls on every tick
pub type RepeatedTask = Arc<dyn Fn() -> BoxFuture<'static, TaskStatus> + Send + Sync>;

#[async_trait]
pub trait PeriodicScheduler: Send + Sync {
    /// Register `task`; `interval` is the base delay after NoWork/Failed
    fn schedule(&self, name: &str, interval: Duration, task: RepeatedTask);

    /// Stop issuing new runs; runs in flight are not interrupted
    fn stop(&self);

    /// Wait until every scheduled task has returned
    async fn await_terminated(&self);
}
