use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Counters for the persister engine
#[derive(Debug, Default)]
pub struct Metrics {
    /// Messages appended to the queue
    pub accepted: AtomicU64,
    /// Messages refused because the engine had stopped accepting
    pub rejected: AtomicU64,
    /// Messages the sink wrote successfully
    pub persisted: AtomicU64,
    /// Messages the sink failed to write
    pub failed: AtomicU64,
    /// Queued messages dropped by an immediate stop or engine fault
    pub discarded: AtomicU64,
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub persisted: u64,
    pub failed: u64,
    pub discarded: u64,
}

impl MetricsSnapshot {
    /// Accepted messages that have neither been written, failed nor been discarded
    pub fn outstanding(&self) -> u64 {
        self.accepted
            .saturating_sub(self.persisted + self.failed + self.discarded)
    }
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_discarded(&self, count: u64) {
        self.discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    /// Get current metrics as a one-line summary
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "accepted={} persisted={} failed={} discarded={} rejected={}",
            s.accepted, s.persisted, s.failed, s.discarded, s.rejected
        )
    }

    /// Log current status
    pub fn log_status(&self) {
        info!("Persister metrics: {}", self.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_outstanding() {
        let metrics = Metrics::new();
        for _ in 0..5 {
            metrics.inc_accepted();
        }
        metrics.inc_persisted();
        metrics.inc_failed();
        metrics.add_discarded(2);
        metrics.inc_rejected();

        let snap = metrics.snapshot();
        assert_eq!(snap.accepted, 5);
        assert_eq!(snap.outstanding(), 1);
        assert_eq!(
            metrics.summary(),
            "accepted=5 persisted=1 failed=1 discarded=2 rejected=1"
        );
    }
}
