//! Concurrent running-statistics tracker
//!
//! Tracks count, total, min and max duration per operation name. The average
//! is derived on every read so it can never go stale. Writers from parallel
//! per-sample transmissions fold into the same aggregate without losing
//! updates.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

/// Running aggregate for one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricAggregate {
    /// Operation name
    pub operation: String,
    /// Sum of all recorded durations in milliseconds
    pub total_duration_ms: u64,
    /// Number of recorded calls
    pub total_calls: u64,
    /// Shortest recorded duration in milliseconds
    pub min_duration_ms: u64,
    /// Longest recorded duration in milliseconds
    pub max_duration_ms: u64,
}

impl MetricAggregate {
    fn new(operation: &str, duration_ms: u64) -> Self {
        Self {
            operation: operation.to_string(),
            total_duration_ms: duration_ms,
            total_calls: 1,
            min_duration_ms: duration_ms,
            max_duration_ms: duration_ms,
        }
    }

    fn fold(&mut self, duration_ms: u64) {
        self.total_duration_ms += duration_ms;
        self.total_calls += 1;
        self.min_duration_ms = self.min_duration_ms.min(duration_ms);
        self.max_duration_ms = self.max_duration_ms.max(duration_ms);
    }

    /// Average duration in milliseconds, recomputed from the running sums.
    pub fn average_duration_ms(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.total_duration_ms as f64 / self.total_calls as f64
    }
}

/// Thread-safe running-statistics tracker keyed by operation name.
#[derive(Debug, Default)]
pub struct PerformanceTracker {
    metrics: Mutex<HashMap<String, MetricAggregate>>,
}

impl PerformanceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call of `operation` that took `duration_ms`.
    pub fn record(&self, operation: &str, duration_ms: u64) {
        let mut metrics = self.metrics.lock();
        match metrics.get_mut(operation) {
            Some(aggregate) => aggregate.fold(duration_ms),
            None => {
                metrics.insert(operation.to_string(), MetricAggregate::new(operation, duration_ms));
            }
        }
    }

    /// Record the time elapsed since `start` for `operation`.
    pub fn record_elapsed(&self, operation: &str, start: Instant) {
        self.record(operation, start.elapsed().as_millis() as u64);
    }

    /// Consistent copy of every aggregate.
    pub fn snapshot(&self) -> HashMap<String, MetricAggregate> {
        self.metrics.lock().clone()
    }
}
