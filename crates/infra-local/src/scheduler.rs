// Repeated task queue on tokio
use async_trait::async_trait;
use drover_core::application::{shutdown_channel, ShutdownSender, ShutdownToken};
use drover_core::port::{PeriodicScheduler, RepeatedTask, TaskStatus};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// Runs each task in its own loop until it asks to stop or the queue is stopped
///
/// `Ok` runs again immediately; `NoWork` and `Failed` wait, doubling the
/// delay from the task's interval up to `max_backoff`.
pub struct TokioRepeatedTaskQueue {
    shutdown: ShutdownSender,
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
    max_backoff: Duration,
}

impl TokioRepeatedTaskQueue {
    pub fn new(max_backoff: Duration) -> Self {
        let (shutdown, _) = shutdown_channel();
        Self {
            shutdown,
            handles: Mutex::new(Vec::new()),
            max_backoff,
        }
    }

    pub fn task_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }
}

async fn run_task(
    name: String,
    interval: Duration,
    max_backoff: Duration,
    task: RepeatedTask,
    mut shutdown: ShutdownToken,
) {
    let mut backoff = interval;
    loop {
        if shutdown.is_shutdown() {
            break;
        }

        let delay = match task().await {
            TaskStatus::Ok => {
                backoff = interval;
                Duration::ZERO
            }
            TaskStatus::NoWork | TaskStatus::Failed => {
                let delay = backoff;
                backoff = (backoff * 2).min(max_backoff.max(interval));
                delay
            }
            TaskStatus::NoReschedule => {
                debug!(task = %name, "Task will not be rescheduled");
                break;
            }
        };

        if delay.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }
        tokio::select! {
            _ = sleep(delay) => {},
            _ = shutdown.wait() => break,
        }
    }
    debug!(task = %name, "Task loop exited");
}

#[async_trait]
impl PeriodicScheduler for TokioRepeatedTaskQueue {
    fn schedule(&self, name: &str, interval: Duration, task: RepeatedTask) {
        if self.shutdown.is_shutdown() {
            info!(task = %name, "Scheduler stopped, task not scheduled");
            return;
        }
        let handle = tokio::spawn(run_task(
            name.to_string(),
            interval,
            self.max_backoff,
            task,
            self.shutdown.token(),
        ));
        self.handles.lock().unwrap().push((name.to_string(), handle));
    }

    fn stop(&self) {
        self.shutdown.shutdown();
    }

    async fn await_terminated(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        for (name, handle) in handles {
            if let Err(e) = handle.await {
                error!(task = %name, error = %e, "Scheduled task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_task(runs: Arc<AtomicUsize>, stop_after: usize) -> RepeatedTask {
        Arc::new(move || {
            let runs = Arc::clone(&runs);
            async move {
                if runs.fetch_add(1, Ordering::SeqCst) + 1 >= stop_after {
                    TaskStatus::NoReschedule
                } else {
                    TaskStatus::Ok
                }
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_ok_reruns_until_no_reschedule() {
        let queue = TokioRepeatedTaskQueue::new(Duration::from_secs(1));
        let runs = Arc::new(AtomicUsize::new(0));
        queue.schedule("t", Duration::from_secs(60), counting_task(runs.clone(), 5));

        queue.await_terminated().await;
        assert_eq!(runs.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_stop_interrupts_backoff() {
        let queue = TokioRepeatedTaskQueue::new(Duration::from_secs(60));
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        queue.schedule(
            "idle",
            Duration::from_secs(60),
            Arc::new(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    TaskStatus::NoWork
                }
                .boxed()
            }),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.stop();
        tokio::time::timeout(Duration::from_secs(5), queue.await_terminated())
            .await
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        queue.schedule("late", Duration::from_secs(1), counting_task(runs, 1));
        assert_eq!(queue.task_count(), 0);
    }
}
