// Metrics Sink Port
// Passed explicitly into each component; no global registry

use crate::domain::QueueName;

/// Monotonic counters, all labeled by queue name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    JobsEnqueued,
    JobsReceived,
    JobsAcknowledged,
    JobsDeadLettered,
    HandlerFailures,
    JobsFailedToAcknowledge,
}

/// Distributions, all labeled by queue name (milliseconds unless noted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Histogram {
    SendTime,
    ReceiveTime,
    DeleteTime,
    HandlerDispatchTime,
    ProcessingLag,
    FirstProcessingLag,
    /// Seconds
    VisibilityTime,
}

impl Counter {
    pub fn name(&self) -> &'static str {
        match self {
            Counter::JobsEnqueued => "jobs_enqueued_total",
            Counter::JobsReceived => "jobs_received_total",
            Counter::JobsAcknowledged => "jobs_acknowledged_total",
            Counter::JobsDeadLettered => "jobs_dead_lettered_total",
            Counter::HandlerFailures => "handler_failures_total",
            Counter::JobsFailedToAcknowledge => "jobs_failed_to_acknowledge_total",
        }
    }
}

impl Histogram {
    pub fn name(&self) -> &'static str {
        match self {
            Histogram::SendTime => "sqs_send_time_ms",
            Histogram::ReceiveTime => "sqs_receive_time_ms",
            Histogram::DeleteTime => "sqs_delete_time_ms",
            Histogram::HandlerDispatchTime => "handler_dispatch_time_ms",
            Histogram::ProcessingLag => "queue_processing_lag_ms",
            Histogram::FirstProcessingLag => "queue_first_processing_lag_ms",
            Histogram::VisibilityTime => "visibility_time_s",
        }
    }
}

pub trait MetricsSink: Send + Sync {
    fn increment(&self, counter: Counter, queue: &QueueName, by: u64);

    fn observe(&self, histogram: Histogram, queue: &QueueName, value: f64);
}

/// Discards everything
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _counter: Counter, _queue: &QueueName, _by: u64) {}

    fn observe(&self, _histogram: Histogram, _queue: &QueueName, _value: f64) {}
}
