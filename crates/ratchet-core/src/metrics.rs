//! Global atomic counters for campaign observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event at the end of a campaign.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    sites_collected: AtomicU64,
    edits_applied: AtomicU64,
    edits_rejected: AtomicU64,
    rollbacks: AtomicU64,
    batches: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            sites_collected: AtomicU64::new(0),
            edits_applied: AtomicU64::new(0),
            edits_rejected: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
            batches: AtomicU64::new(0),
        }
    }

    pub fn add_sites_collected(&self, n: u64) {
        self.sites_collected.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_edits_applied(&self, n: u64) {
        self.edits_applied.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_edits_rejected(&self, n: u64) {
        self.edits_rejected.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_rollbacks(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rollbacks", "counter incremented");
    }

    pub fn inc_batches(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all current counter values as one `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            sites_collected = self.sites_collected(),
            edits_applied = self.edits_applied(),
            edits_rejected = self.edits_rejected(),
            rollbacks = self.rollbacks(),
            batches = self.batches(),
        );
    }

    pub fn sites_collected(&self) -> u64 {
        self.sites_collected.load(Ordering::Relaxed)
    }

    pub fn edits_applied(&self) -> u64 {
        self.edits_applied.load(Ordering::Relaxed)
    }

    pub fn edits_rejected(&self) -> u64 {
        self.edits_rejected.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.sites_collected.store(0, Ordering::Relaxed);
        self.edits_applied.store(0, Ordering::Relaxed);
        self.edits_rejected.store(0, Ordering::Relaxed);
        self.rollbacks.store(0, Ordering::Relaxed);
        self.batches.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        let m = Metrics::new();
        m.add_sites_collected(435);
        m.add_edits_applied(14);
        m.add_edits_rejected(1);
        m.inc_rollbacks();
        m.inc_rollbacks();
        m.inc_batches();
        assert_eq!(m.sites_collected(), 435);
        assert_eq!(m.edits_applied(), 14);
        assert_eq!(m.edits_rejected(), 1);
        assert_eq!(m.rollbacks(), 2);
        assert_eq!(m.batches(), 1);

        m.reset();
        assert_eq!(m.sites_collected(), 0);
        assert_eq!(m.rollbacks(), 0);
    }
}
