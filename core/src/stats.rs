//! Protocol execution statistics
//!
//! Running counters updated once per protocol run. The orchestrator depends
//! on the `StatsService` trait so callers can share one tracker across
//! orchestrators or give each test its own.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    /// Running mean of run durations, in seconds
    pub average_duration_secs: f64,
}

pub trait StatsService: Send + Sync {
    /// Record one finished protocol run
    fn record(&self, success: bool, duration: Duration);

    fn snapshot(&self) -> ExecutionStats;

    fn reset(&self);
}

/// Process-local, non-persistent statistics
#[derive(Debug, Default)]
pub struct InMemoryStats {
    inner: Mutex<ExecutionStats>,
}

impl InMemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ExecutionStats> {
        // Counters stay usable even if a recording thread panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StatsService for InMemoryStats {
    fn record(&self, success: bool, duration: Duration) {
        let mut stats = self.lock();
        stats.total_executions += 1;
        if success {
            stats.successful_executions += 1;
        } else {
            stats.failed_executions += 1;
        }

        let n = stats.total_executions as f64;
        stats.average_duration_secs =
            (stats.average_duration_secs * (n - 1.0) + duration.as_secs_f64()) / n;
    }

    fn snapshot(&self) -> ExecutionStats {
        self.lock().clone()
    }

    fn reset(&self) {
        *self.lock() = ExecutionStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_and_running_mean() {
        let stats = InMemoryStats::new();
        stats.record(true, Duration::from_secs(2));
        stats.record(false, Duration::from_secs(4));
        stats.record(true, Duration::from_secs(6));

        let snap = stats.snapshot();
        assert_eq!(snap.total_executions, 3);
        assert_eq!(snap.successful_executions, 2);
        assert_eq!(snap.failed_executions, 1);
        assert!((snap.average_duration_secs - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let stats = InMemoryStats::new();
        stats.record(true, Duration::from_millis(10));
        stats.reset();
        assert_eq!(stats.snapshot(), ExecutionStats::default());
    }

    #[test]
    fn test_concurrent_recording() {
        let stats = Arc::new(InMemoryStats::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        stats.record(i % 2 == 0, Duration::from_millis(1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.total_executions, 800);
        assert_eq!(snap.successful_executions, 400);
        assert!((snap.average_duration_secs - 0.001).abs() < 1e-9);
    }
}
