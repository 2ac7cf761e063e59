use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters, updated without locking from every request
#[derive(Debug, Default)]
pub(crate) struct Counters {
    requests: AtomicU64,
    dedup_hits: AtomicU64,
    cancellations: AtomicU64,
    failures: AtomicU64,
    key_fallbacks: AtomicU64,
}

impl Counters {
    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dedup_hit(&self) {
        self.dedup_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_key_fallback(&self) {
        self.key_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            requests: self.requests.load(Ordering::Relaxed),
            dedup_hits: self.dedup_hits.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            key_fallbacks: self.key_fallbacks.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time statistics of a [`crate::Coordinator`].
///
/// All counters are per caller: three callers sharing one execution count
/// as three requests and two dedup hits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    /// Calls made to the coordinator
    pub requests: u64,
    /// Calls that attached to a request already in flight
    pub dedup_hits: u64,
    /// Calls that ended with [`crate::ErrorKind::Cancelled`]
    pub cancellations: u64,
    /// Calls that ended with any other error
    pub failures: u64,
    /// Calls whose body could not be serialized for deduplication
    pub key_fallbacks: u64,
}

impl CoordinatorStats {
    /// Number of calls which issued their own execution
    #[must_use]
    pub const fn executions(&self) -> u64 {
        self.requests.saturating_sub(self.dedup_hits)
    }

    /// Fraction of calls that were served by another call's execution
    #[must_use]
    pub fn dedup_ratio(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = self.dedup_hits as f64 / self.requests as f64;
        ratio
    }
}
