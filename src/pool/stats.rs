use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::error;

/// Snapshot of what the worker pool has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Requests a worker started on
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Requests dropped because they were cancelled or superseded
    pub discarded: u64,
    pub cache_hits: u64,
    pub consecutive_failures: u64,
}

/// Counters shared by every worker.
#[derive(Debug)]
pub(super) struct PoolCounters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
    cache_hits: AtomicU64,
    consecutive_failures: AtomicU64,
    alerted: AtomicBool,
    alert_threshold: u64,
}

impl PoolCounters {
    /// A threshold of zero disables the failure alert.
    pub(super) fn new(alert_threshold: usize) -> Self {
        Self {
            processed: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            alerted: AtomicBool::new(false),
            alert_threshold: alert_threshold as u64,
        }
    }

    pub(super) fn started(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.alerted.store(false, Ordering::Relaxed);
    }

    /// Count a failure, raising the alarm once per streak.
    pub(super) fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        let streak = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if self.alert_threshold > 0
            && streak >= self.alert_threshold
            && !self.alerted.swap(true, Ordering::Relaxed)
        {
            error!(
                "{} thumbnails in a row failed; check the picture source and memory limits",
                streak
            );
        }
    }

    pub(super) fn snapshot(&self) -> PoolStats {
        PoolStats {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    pub(super) fn alerted(&self) -> bool {
        self.alerted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streak_resets_on_success() {
        let counters = PoolCounters::new(3);
        counters.failed();
        counters.failed();
        assert!(!counters.alerted());
        counters.failed();
        assert!(counters.alerted());

        counters.succeeded();
        let stats = counters.snapshot();
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.consecutive_failures, 0);
        assert!(!counters.alerted());
    }

    #[test]
    fn test_zero_threshold_never_alerts() {
        let counters = PoolCounters::new(0);
        for _ in 0..10 {
            counters.failed();
        }
        assert!(!counters.alerted());
    }
}
