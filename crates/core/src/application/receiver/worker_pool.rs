// Bounded worker pool - runs handlers off the poll loop
use super::super::handler::JobHandler;
use super::super::job::Job;
use super::super::panic_guard::{execute_guarded_async, PanicGuardResult};
use crate::port::{Counter, Histogram, MetricsSink, TimeProvider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error};

type JobReceiver = Arc<AsyncMutex<mpsc::Receiver<Arc<Job>>>>;

/// Fixed set of workers draining a bounded job queue
pub struct WorkerPool {
    size: usize,
    queue_capacity: usize,
    sender: Mutex<Option<mpsc::Sender<Arc<Job>>>>,
    receiver: Mutex<Option<mpsc::Receiver<Arc<Job>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Jobs submitted and not yet finished (queued + running)
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    handler: Arc<dyn JobHandler>,
    metrics: Arc<dyn MetricsSink>,
    time_provider: Arc<dyn TimeProvider>,
}

impl WorkerPool {
    pub fn new(
        size: usize,
        queue_capacity: usize,
        handler: Arc<dyn JobHandler>,
        metrics: Arc<dyn MetricsSink>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            size: size.max(1),
            queue_capacity,
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            workers: Mutex::new(Vec::new()),
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            handler,
            metrics,
            time_provider,
        }
    }

    /// Spawn the workers; a second call is a no-op
    pub fn start(&self) {
        let Some(rx) = self.receiver.lock().unwrap().take() else {
            return;
        };
        let rx: JobReceiver = Arc::new(AsyncMutex::new(rx));

        let mut workers = self.workers.lock().unwrap();
        for worker_id in 0..self.size {
            let worker = Worker {
                id: worker_id,
                rx: Arc::clone(&rx),
                handler: Arc::clone(&self.handler),
                metrics: Arc::clone(&self.metrics),
                time_provider: Arc::clone(&self.time_provider),
                pending: Arc::clone(&self.pending),
                idle: Arc::clone(&self.idle),
            };
            workers.push(tokio::spawn(worker.run()));
        }
    }

    /// Jobs that can be submitted right now without waiting
    pub fn free_capacity(&self) -> usize {
        (self.size + self.queue_capacity).saturating_sub(self.pending.load(Ordering::SeqCst))
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Queue a job for a worker; false if the pool is closed
    pub async fn submit(&self, job: Arc<Job>) -> bool {
        let Some(sender) = self.sender.lock().unwrap().clone() else {
            return false;
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        if sender.send(job).await.is_err() {
            self.finish_one();
            return false;
        }
        true
    }

    /// Stop accepting jobs; queued jobs still run
    pub fn close(&self) {
        self.sender.lock().unwrap().take();
        // Never started: nothing will drain the queue, drop it
        if let Some(mut rx) = self.receiver.lock().unwrap().take() {
            rx.close();
            while rx.try_recv().is_ok() {
                self.finish_one();
            }
        }
    }

    /// Wait until no job is queued or running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Wait for every worker to exit; call after [`close`](Self::close)
    pub async fn join(&self) {
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in workers {
            let _ = handle.await;
        }
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

struct Worker {
    id: usize,
    rx: JobReceiver,
    handler: Arc<dyn JobHandler>,
    metrics: Arc<dyn MetricsSink>,
    time_provider: Arc<dyn TimeProvider>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = self.rx.lock().await.recv().await;
            let Some(job) = next else {
                break;
            };

            self.execute(job).await;

            if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.idle.notify_waiters();
            }
        }
        debug!(worker_id = %self.id, "Worker exited");
    }

    /// Handler failures and panics stay here; the receipt is left for redelivery
    async fn execute(&self, job: Arc<Job>) {
        let started = self.time_provider.now_millis();
        let handler = Arc::clone(&self.handler);
        let handled = Arc::clone(&job);

        match execute_guarded_async(async move { handler.handle_job(handled).await }).await {
            PanicGuardResult::Success(Ok(())) => {
                self.metrics.observe(
                    Histogram::HandlerDispatchTime,
                    job.queue_name(),
                    (self.time_provider.now_millis() - started) as f64,
                );
            }
            PanicGuardResult::Success(Err(e)) => {
                error!(
                    job_id = %job.id(),
                    queue = %job.queue_name(),
                    error = %e,
                    "Job handler failed"
                );
                self.metrics
                    .increment(Counter::HandlerFailures, job.queue_name(), 1);
            }
            PanicGuardResult::Panicked(msg) => {
                error!(
                    job_id = %job.id(),
                    queue = %job.queue_name(),
                    panic_msg = %msg,
                    "Job handler panicked"
                );
                self.metrics
                    .increment(Counter::HandlerFailures, job.queue_name(), 1);
            }
        }
    }
}
