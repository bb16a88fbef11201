//! Process-wide counters surfaced by the health endpoints.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Shared mutable process state. Cheap atomics; no locks.
#[derive(Debug, Default)]
pub struct ProcessCounters {
    /// Cross-user access rejections (integrity incidents).
    pub cross_user_rejections: AtomicU64,
    /// Quote snapshots served.
    pub quote_requests: AtomicU64,
    /// Quote snapshots fast-failed by the open circuit.
    pub quote_fast_fails: AtomicU64,
    /// Operator pause: generator cycles no-op while set. Shared as an Arc
    /// so job handlers can observe the same flag without holding the
    /// whole counter set.
    pub paused: Arc<AtomicBool>,
}

impl ProcessCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared pause flag handle.
    pub fn paused_flag(&self) -> Arc<AtomicBool> {
        self.paused.clone()
    }

    pub fn record_cross_user_rejection(&self) {
        self.cross_user_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_quote_request(&self, fast_failed: bool) {
        self.quote_requests.fetch_add(1, Ordering::Relaxed);
        if fast_failed {
            self.quote_fast_fails.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let c = ProcessCounters::new();
        c.record_cross_user_rejection();
        c.record_cross_user_rejection();
        assert_eq!(c.cross_user_rejections.load(Ordering::Relaxed), 2);

        c.record_quote_request(false);
        c.record_quote_request(true);
        assert_eq!(c.quote_requests.load(Ordering::Relaxed), 2);
        assert_eq!(c.quote_fast_fails.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn pause_toggles() {
        let c = ProcessCounters::new();
        assert!(!c.is_paused());
        c.set_paused(true);
        assert!(c.is_paused());
        c.set_paused(false);
        assert!(!c.is_paused());
    }
}
