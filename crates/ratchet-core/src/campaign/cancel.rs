//! Cooperative cancellation latch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Once set, stays set. The controller only looks at it between batches, so
/// a batch in flight always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelLatch {
    requested: Arc<AtomicBool>,
}

impl CancelLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}
