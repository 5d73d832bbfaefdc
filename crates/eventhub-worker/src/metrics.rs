//! Atomic job counters.
//!
//! The worker logs a snapshot on an interval; nothing here is exported.
//! Counters are plain atomics, the only cross-task shared state besides
//! the job channel and the breaker.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// Counters accumulated over the worker's lifetime.
#[derive(Debug, Default)]
pub struct JobMetrics {
    claimed: AtomicU64,
    done: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    duration_count: AtomicU64,
    duration_total_ms: AtomicU64,
    duration_max_ms: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Jobs handed to executors.
    pub claimed: u64,
    /// Jobs that reached `done`.
    pub done: u64,
    /// Executions that returned an error.
    pub failed: u64,
    /// Failures that were rescheduled.
    pub retried: u64,
    /// Failures that dead-lettered.
    pub dead_lettered: u64,
    /// Number of duration observations.
    pub duration_count: u64,
    /// Mean execution duration in milliseconds.
    pub duration_avg_ms: u64,
    /// Longest execution in milliseconds.
    pub duration_max_ms: u64,
}

impl JobMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a claim handed to an executor.
    pub fn inc_claimed(&self) {
        self.claimed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful completion.
    pub fn inc_done(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed execution.
    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a reschedule.
    pub fn inc_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a dead-letter.
    pub fn inc_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an execution duration.
    pub fn observe_duration(&self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.duration_count.fetch_add(1, Ordering::Relaxed);
        self.duration_total_ms.fetch_add(ms, Ordering::Relaxed);
        self.duration_max_ms.fetch_max(ms, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let count = self.duration_count.load(Ordering::Relaxed);
        let total = self.duration_total_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            claimed: self.claimed.load(Ordering::Relaxed),
            done: self.done.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            duration_count: count,
            duration_avg_ms: if count == 0 { 0 } else { total / count },
            duration_max_ms: self.duration_max_ms.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let metrics = JobMetrics::new();
        metrics.inc_claimed();
        metrics.inc_claimed();
        metrics.inc_done();
        metrics.inc_failed();
        metrics.inc_retried();
        metrics.observe_duration(Duration::from_millis(10));
        metrics.observe_duration(Duration::from_millis(30));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.claimed, 2);
        assert_eq!(snapshot.done, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.retried, 1);
        assert_eq!(snapshot.dead_lettered, 0);
        assert_eq!(snapshot.duration_avg_ms, 20);
        assert_eq!(snapshot.duration_max_ms, 30);
    }
}
