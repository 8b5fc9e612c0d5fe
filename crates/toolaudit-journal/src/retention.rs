//! Throttling of retention sweeps.

use std::sync::atomic::{AtomicI64, Ordering};

/// Decides when the next retention sweep is due.
///
/// Holds the time of the last sweep in process memory. A fresh manager
/// treats the epoch as the last sweep, so the first check after start-up is
/// always due.
#[derive(Debug)]
pub struct RetentionManager {
    retention_ms: Option<u64>,
    cleanup_interval_ms: u64,
    last_sweep_at: AtomicI64,
}

impl RetentionManager {
    /// Creates a manager. `retention_ms = None` disables sweeping.
    pub fn new(retention_ms: Option<u64>, cleanup_interval_ms: u64) -> Self {
        Self {
            retention_ms,
            cleanup_interval_ms,
            last_sweep_at: AtomicI64::new(0),
        }
    }

    /// Whether a retention window is configured.
    pub fn is_enabled(&self) -> bool {
        self.retention_ms.is_some()
    }

    /// True if retention is enabled and at least `cleanup_interval_ms` has
    /// passed since the last sweep.
    pub fn is_sweep_due(&self, now_ms: i64) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let elapsed = now_ms.saturating_sub(self.last_sweep_at.load(Ordering::Acquire));
        elapsed >= clamp_ms(self.cleanup_interval_ms)
    }

    /// Records that a sweep ran at `now_ms`, resetting the interval.
    pub fn mark_swept(&self, now_ms: i64) {
        self.last_sweep_at.store(now_ms, Ordering::Release);
    }

    /// Rows with a timestamp strictly below this are eligible for deletion.
    /// `None` when retention is disabled.
    pub fn cutoff(&self, now_ms: i64) -> Option<i64> {
        self.retention_ms
            .map(|retention| now_ms.saturating_sub(clamp_ms(retention)))
    }

    /// Time of the last recorded sweep, epoch milliseconds.
    pub fn last_sweep_at(&self) -> i64 {
        self.last_sweep_at.load(Ordering::Acquire)
    }
}

fn clamp_ms(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}
