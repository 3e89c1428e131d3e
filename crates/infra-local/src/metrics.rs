// In-memory metrics sink with inspection
use drover_core::domain::QueueName;
use drover_core::port::{Counter, Histogram, MetricsSink};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<(Counter, QueueName), u64>>,
    histograms: Mutex<HashMap<(Histogram, QueueName), Vec<f64>>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, counter: Counter, queue: &QueueName) -> u64 {
        self.counters
            .lock()
            .unwrap()
            .get(&(counter, queue.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub fn observations(&self, histogram: Histogram, queue: &QueueName) -> Vec<f64> {
        self.histograms
            .lock()
            .unwrap()
            .get(&(histogram, queue.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Every non-zero counter, sorted by metric then queue name
    pub fn counter_snapshot(&self) -> Vec<(&'static str, QueueName, u64)> {
        let mut snapshot: Vec<_> = self
            .counters
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, value)| **value > 0)
            .map(|((counter, queue), value)| (counter.name(), queue.clone(), *value))
            .collect();
        snapshot.sort_by(|a, b| (a.0, a.1.as_str()).cmp(&(b.0, b.1.as_str())));
        snapshot
    }

    pub fn reset(&self) {
        self.counters.lock().unwrap().clear();
        self.histograms.lock().unwrap().clear();
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment(&self, counter: Counter, queue: &QueueName, by: u64) {
        *self
            .counters
            .lock()
            .unwrap()
            .entry((counter, queue.clone()))
            .or_insert(0) += by;
    }

    fn observe(&self, histogram: Histogram, queue: &QueueName, value: f64) {
        self.histograms
            .lock()
            .unwrap()
            .entry((histogram, queue.clone()))
            .or_default()
            .push(value);
    }
}
