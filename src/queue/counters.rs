//! Queue status counters.
//!
//! In-memory counters tracking in-progress, success and error counts plus
//! accumulated execution time. Updated as a side effect of coordinator state
//! transitions; one instance is injected per process and shared by reference.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counter set for queue monitoring.
#[derive(Debug, Default)]
pub struct QueueStatusCounters {
    in_progress: AtomicU64,
    success: AtomicU64,
    error: AtomicU64,
    processing_time_ms: AtomicU64,
}

impl QueueStatusCounters {
    /// Creates a zeroed counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a task entering execution.
    pub fn add_in_progress(&self) {
        self.in_progress.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a successful completion with its execution time.
    pub fn add_success(&self, execution_time_ms: i64) {
        self.finish(execution_time_ms);
        self.success.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a failed completion with its execution time.
    pub fn add_error(&self, execution_time_ms: i64) {
        self.finish(execution_time_ms);
        self.error.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self, execution_time_ms: i64) {
        // A terminal transition can be reported without a matching
        // in-progress increment (e.g. removing a vanished task), so the
        // decrement saturates at zero.
        let _ = self
            .in_progress
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(v.saturating_sub(1))
            });
        self.processing_time_ms
            .fetch_add(execution_time_ms.max(0) as u64, Ordering::SeqCst);
    }

    /// Returns a consistent snapshot of the counters.
    pub fn snapshot(&self) -> QueueStatusSnapshot {
        QueueStatusSnapshot {
            in_progress_count: self.in_progress.load(Ordering::SeqCst),
            success_count: self.success.load(Ordering::SeqCst),
            error_count: self.error.load(Ordering::SeqCst),
            processing_time_ms: self.processing_time_ms.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time view of the queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatusSnapshot {
    /// Number of tasks currently executing.
    pub in_progress_count: u64,
    /// Number of tasks finished successfully.
    pub success_count: u64,
    /// Number of tasks finished in error.
    pub error_count: u64,
    /// Accumulated execution time of finished tasks.
    pub processing_time_ms: u64,
}

impl QueueStatusSnapshot {
    /// Returns the total number of finished tasks.
    pub fn total_finished(&self) -> u64 {
        self.success_count + self.error_count
    }

    /// Returns the average execution time of finished tasks, in ms.
    pub fn average_execution_time_ms(&self) -> u64 {
        let total = self.total_finished();
        if total == 0 {
            return 0;
        }
        self.processing_time_ms / total
    }
}
