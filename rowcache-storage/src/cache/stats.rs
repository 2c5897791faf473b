//! Result cache counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of result cache activity since the context was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Composite entries found with every row present.
    pub hits: u64,
    /// Composite entries absent or undecodable.
    pub misses: u64,
    /// Composite entries found with at least one row expired or corrupt.
    pub partial_hits: u64,
    /// Row or composite payloads that failed to decode.
    pub decode_failures: u64,
    /// Rows written by population or refresh.
    pub rows_written: u64,
    /// Composite entries written.
    pub entries_written: u64,
    /// Composite entries removed by invalidation or table sweeps.
    pub entries_evicted: u64,
}

impl CacheStats {
    /// Fraction of lookups that were complete hits (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.partial_hits;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Shared atomic counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    partial_hits: AtomicU64,
    decode_failures: AtomicU64,
    rows_written: AtomicU64,
    entries_written: AtomicU64,
    entries_evicted: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn partial_hit(&self) {
        self.partial_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rows_written(&self, n: u64) {
        self.rows_written.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn entry_written(&self) {
        self.entries_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn entries_evicted(&self, n: u64) {
        self.entries_evicted.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            partial_hits: self.partial_hits.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            entries_written: self.entries_written.load(Ordering::Relaxed),
            entries_evicted: self.entries_evicted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_empty() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_counts_partials_as_lookups() {
        let stats = CacheStats {
            hits: 2,
            misses: 1,
            partial_hits: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = StatsCounters::default();
        counters.hit();
        counters.miss();
        counters.rows_written(3);
        counters.entries_evicted(2);
        let snap = counters.snapshot();
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.rows_written, 3);
        assert_eq!(snap.entries_evicted, 2);
    }
}
