//! Batch eviction ranked by decayed usage
//!
//! When a new key arrives at a full table, every entry's usage score is
//! decayed, entries are ranked by the decayed score, and the lowest batch
//! is dropped in one pass:
//!
//! 1. Decay: active entries by [`USAGE_DECAY`], sticky entries (no completed
//!    call yet) by [`STICKY_DECAY`], so abandoned reservations go first.
//! 2. Sort ascending by decayed score; sticky entries rank first on ties.
//! 3. The median score becomes the starting score of new sticky entries,
//!    keeping fresh keys competitive with the established population.
//! 4. Remove `min(n, max(MIN_VICTIMS, n * VICTIM_PERCENT / 100))` entries.
//!
//! Removing a batch rather than one entry amortizes the sort over many
//! inserts. On small tables the minimum batch can remove more entries than
//! strictly needed, up to the whole table.

use crate::table::TableState;
use colorstat_common::Key;

/// Score an entry gets on its first completed call
pub const USAGE_INIT: f64 = 1.0;

/// Score added by each further call
pub const USAGE_EXEC: f64 = 1.0;

/// Per-pass decay factor for active entries
pub const USAGE_DECAY: f64 = 0.99;

/// Per-pass decay factor for sticky entries
pub const STICKY_DECAY: f64 = 0.50;

/// Share of the table removed per pass, in percent
pub const VICTIM_PERCENT: usize = 5;

/// Minimum number of entries removed per pass
pub const MIN_VICTIMS: usize = 10;

/// Eviction tuning
#[derive(Clone, Debug, PartialEq)]
pub struct EvictionPolicy {
    pub usage_decay: f64,
    pub sticky_decay: f64,
    pub victim_percent: usize,
    pub min_victims: usize,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            usage_decay: USAGE_DECAY,
            sticky_decay: STICKY_DECAY,
            victim_percent: VICTIM_PERCENT,
            min_victims: MIN_VICTIMS,
        }
    }
}

/// Eviction candidate: decayed score, stickiness and key
struct Candidate {
    usage: f64,
    sticky: bool,
    key: Key,
}

impl EvictionPolicy {
    /// Number of entries one pass removes from a table of `n` entries
    #[must_use]
    pub fn batch_size(&self, n: usize) -> usize {
        (n * self.victim_percent / 100).max(self.min_victims).min(n)
    }

    /// Run one pass over the table. Caller holds the table write lock.
    ///
    /// Returns the number of removed entries.
    pub(crate) fn evict(&self, state: &mut TableState) -> usize {
        let mut ranked: Vec<Candidate> = state
            .entries
            .values()
            .map(|record| {
                let c = record.decay(self.usage_decay, self.sticky_decay);
                Candidate {
                    usage: c.usage,
                    sticky: c.is_sticky(),
                    key: *record.key(),
                }
            })
            .collect();

        if ranked.is_empty() {
            return 0;
        }

        ranked.sort_by(|a, b| a.usage.total_cmp(&b.usage).then(b.sticky.cmp(&a.sticky)));

        state.median_usage = ranked[ranked.len() / 2].usage;

        let victims = self.batch_size(ranked.len());
        for candidate in &ranked[..victims] {
            state.entries.remove(&candidate.key);
        }
        victims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::StatsTable;
    use colorstat_common::{DbId, QueryId, UserId};
    use rand::Rng;

    fn key(query: u64) -> Key {
        Key::new(UserId::new(10), DbId::new(1), QueryId::new(query), None)
    }

    /// Insert a key and complete `calls` calls on it
    fn record(table: &StatsTable, query: u64, calls: u64) {
        let entry = table.insert_if_absent(key(query));
        for _ in 0..calls {
            entry.increment();
        }
    }

    #[test]
    fn test_batch_size() {
        let policy = EvictionPolicy::default();
        assert_eq!(policy.batch_size(0), 0);
        assert_eq!(policy.batch_size(3), 3);
        assert_eq!(policy.batch_size(40), 10);
        assert_eq!(policy.batch_size(200), 10);
        assert_eq!(policy.batch_size(1000), 50);
        assert_eq!(policy.batch_size(50_000), 2500);
    }

    #[test]
    fn test_small_table_batch_drains_all() {
        // A, B, C active; D arrives at a full table of 3
        let table = StatsTable::new(3);
        for q in 1..=3 {
            record(&table, q, 1);
        }
        record(&table, 4, 1);

        assert_eq!(table.count(), 1);
        assert_eq!(table.find(&key(4)).unwrap().counters().calls, 1);
        let stats = table.stats().snapshot(0, 0.0);
        assert_eq!(stats.evictions, 3);
        assert_eq!(stats.eviction_passes, 1);
    }

    #[test]
    fn test_frequent_entry_survives() {
        let table = StatsTable::new(40);
        record(&table, 0, 11);
        for q in 1..40 {
            record(&table, q, 1);
        }
        assert_eq!(table.count(), 40);

        record(&table, 100, 1);

        assert_eq!(table.count(), 31);
        assert_eq!(table.find(&key(0)).unwrap().counters().calls, 11);
        assert!(table.find(&key(100)).is_some());
    }

    #[test]
    fn test_sticky_entries_evicted_first() {
        let table = StatsTable::new(40);
        for q in 0..30 {
            record(&table, q, 1);
        }
        for q in 30..40 {
            // Reserved but never completed
            table.insert_if_absent(key(q));
        }

        table.insert_if_absent(key(100));

        assert_eq!(table.count(), 31);
        for q in 30..40 {
            assert!(table.find(&key(q)).is_none(), "sticky entry {q} survived");
        }
        for q in 0..30 {
            assert!(table.find(&key(q)).is_some(), "active entry {q} evicted");
        }
    }

    #[test]
    fn test_sticky_loses_ties() {
        // Equal decay for both kinds so the scores tie exactly
        let policy = EvictionPolicy {
            usage_decay: 0.5,
            sticky_decay: 0.5,
            min_victims: 1,
            ..Default::default()
        };
        let table = StatsTable::with_policy(2, policy);
        record(&table, 1, 1);
        table.insert_if_absent(key(2));
        assert_eq!(
            table.find(&key(1)).unwrap().counters().usage,
            table.find(&key(2)).unwrap().counters().usage
        );

        table.insert_if_absent(key(3));
        assert!(table.find(&key(1)).is_some());
        assert!(table.find(&key(2)).is_none());
        assert_eq!(table.count(), 2);
    }

    #[test]
    fn test_new_entries_start_at_median() {
        let table = StatsTable::new(40);
        for q in 0..30 {
            record(&table, q, 1);
        }
        for q in 30..40 {
            table.insert_if_absent(key(q));
        }

        let fresh = table.insert_if_absent(key(100));

        // 10 sticky at 0.5 and 30 active at 0.99: the median is active
        assert!((table.median_usage() - USAGE_INIT * USAGE_DECAY).abs() < 1e-12);
        assert_eq!(fresh.counters().usage, table.median_usage());
        assert!(fresh.is_sticky());
    }

    #[test]
    fn test_capacity_holds_under_random_pressure() {
        let capacity = 200;
        let table = StatsTable::new(capacity);
        let mut rng = rand::thread_rng();

        for _ in 0..5000 {
            let query = rng.gen_range(0..2000u64);
            let entry = table.insert_if_absent(key(query));
            if rng.gen_bool(0.9) {
                entry.increment();
            }
            assert!(table.count() <= capacity);
        }

        let stats = table.stats().snapshot(table.count(), table.median_usage());
        assert!(stats.eviction_passes > 0);
        assert_eq!(stats.evictions % 10, 0);
    }
}
