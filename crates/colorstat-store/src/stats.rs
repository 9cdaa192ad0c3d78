//! Store statistics for monitoring

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing what the store has done since it was opened
#[derive(Debug, Default)]
pub struct StoreStats {
    /// Number of entries removed by eviction
    pub evictions: AtomicU64,
    /// Number of eviction passes run
    pub eviction_passes: AtomicU64,
    /// Number of entries removed by reconciliation
    pub pruned: AtomicU64,
    /// Number of explicit resets
    pub resets: AtomicU64,
    /// Number of entries restored from a snapshot
    pub restored: AtomicU64,
}

impl StoreStats {
    /// Take a point-in-time copy of the counters
    pub fn snapshot(&self, entries: usize, median_usage: f64) -> StoreStatsSnapshot {
        StoreStatsSnapshot {
            entries,
            median_usage,
            evictions: self.evictions.load(Ordering::Relaxed),
            eviction_passes: self.eviction_passes.load(Ordering::Relaxed),
            pruned: self.pruned.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            restored: self.restored.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_eviction(&self, victims: usize) {
        self.eviction_passes.fetch_add(1, Ordering::Relaxed);
        self.evictions.fetch_add(victims as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_pruned(&self, pruned: usize) {
        self.pruned.fetch_add(pruned as u64, Ordering::Relaxed);
    }
}

/// Serializable copy of [`StoreStats`] plus table gauges
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StoreStatsSnapshot {
    /// Live entries in the table
    pub entries: usize,
    /// Usage score new entries start from
    pub median_usage: f64,
    pub evictions: u64,
    pub eviction_passes: u64,
    pub pruned: u64,
    pub resets: u64,
    pub restored: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = StoreStats::default();
        stats.record_eviction(10);
        stats.record_eviction(12);
        stats.record_pruned(3);
        stats.resets.fetch_add(1, Ordering::Relaxed);

        let snap = stats.snapshot(7, 1.5);
        assert_eq!(snap.entries, 7);
        assert_eq!(snap.evictions, 22);
        assert_eq!(snap.eviction_passes, 2);
        assert_eq!(snap.pruned, 3);
        assert_eq!(snap.resets, 1);
        assert_eq!(snap.restored, 0);
    }
}
