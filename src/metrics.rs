//! Monotonic usage counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing counters tracked by a [`crate::Cache`].
///
/// Counters live outside the primary store lock: they are plain atomics
/// incremented on the relevant fast paths. Only monotonicity is guaranteed,
/// not linearizability with store mutations.
#[derive(Debug, Default)]
pub(crate) struct Metrics {
    inserted: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    retrievals: AtomicU64,
    evicted: AtomicU64,
}

impl Metrics {
    pub(crate) fn record_insert(&self) {
        self.inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retrieval(&self) {
        self.retrievals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            inserted: self.inserted.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            retrievals: self.retrievals.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time read of a cache's [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Number of entries ever inserted (`set`/`set_with_ttl`/successful loads).
    pub inserted: u64,
    /// Number of `get` calls that found a live, unexpired entry.
    pub hits: u64,
    /// Number of `get` calls that found no entry and no loader was configured.
    pub misses: u64,
    /// Number of `get` calls that returned a value, hit or loaded.
    pub retrievals: u64,
    /// Number of entries removed by expiration or size eviction.
    pub evicted: u64,
}
