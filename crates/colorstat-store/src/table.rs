//! Fixed-capacity statistics table
//!
//! Entries live in a hash map behind a single reader/writer lock. Each
//! entry carries its own mutex for the counters, so the table lock is only
//! taken exclusively for structural changes (new keys, eviction,
//! reconciliation, reset).

use crate::eviction::{EvictionPolicy, USAGE_EXEC, USAGE_INIT};
use crate::stats::StoreStats;
use colorstat_common::Key;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use xxhash_rust::xxh64::Xxh64Builder;

/// Hash seed for the entry map
const KEY_HASH_SEED: u64 = 0x636f_6c6f_7273_7461;

pub(crate) type EntryMap = HashMap<Key, Arc<UsageRecord>, Xxh64Builder>;

/// Per-entry counters guarded by the entry mutex
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Counters {
    /// Completed calls; zero while the entry is sticky
    pub calls: u64,
    /// Decayed usage score used to rank eviction candidates
    pub usage: f64,
}

impl Counters {
    #[must_use]
    pub const fn is_sticky(&self) -> bool {
        self.calls == 0
    }
}

/// A single usage statistics entry
pub struct UsageRecord {
    key: Key,
    counters: Mutex<Counters>,
}

impl UsageRecord {
    fn sticky(key: Key, usage: f64) -> Self {
        Self::with_counters(key, Counters { calls: 0, usage })
    }

    fn with_counters(key: Key, counters: Counters) -> Self {
        Self {
            key,
            counters: Mutex::new(counters),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Copy of the counters taken under the entry mutex
    pub fn counters(&self) -> Counters {
        *self.counters.lock()
    }

    pub fn is_sticky(&self) -> bool {
        self.counters.lock().is_sticky()
    }

    /// Count one completed call, returning the new call count
    ///
    /// The first call unsticks the entry and resets its score to
    /// [`USAGE_INIT`] regardless of how far it decayed while sticky.
    pub(crate) fn increment(&self) -> u64 {
        let mut c = self.counters.lock();
        if c.is_sticky() {
            c.usage = USAGE_INIT;
        } else {
            c.usage += USAGE_EXEC;
        }
        c.calls += 1;
        c.calls
    }

    /// Apply one decay step and return the decayed counters
    pub(crate) fn decay(&self, usage_decay: f64, sticky_decay: f64) -> Counters {
        let mut c = self.counters.lock();
        c.usage *= if c.is_sticky() { sticky_decay } else { usage_decay };
        *c
    }
}

impl std::fmt::Debug for UsageRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageRecord")
            .field("key", &self.key)
            .field("counters", &self.counters())
            .finish()
    }
}

/// State guarded by the table lock
pub(crate) struct TableState {
    pub(crate) entries: EntryMap,
    /// Score new sticky entries start from; refreshed by every eviction pass
    pub(crate) median_usage: f64,
}

/// Fixed-capacity table of usage records
pub struct StatsTable {
    state: RwLock<TableState>,
    capacity: usize,
    policy: EvictionPolicy,
    stats: StoreStats,
}

impl StatsTable {
    /// Create an empty table holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, EvictionPolicy::default())
    }

    /// Create an empty table with a specific eviction policy
    pub fn with_policy(capacity: usize, policy: EvictionPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: RwLock::new(TableState {
                entries: HashMap::with_capacity_and_hasher(
                    capacity,
                    Xxh64Builder::new(KEY_HASH_SEED),
                ),
                median_usage: USAGE_INIT,
            }),
            capacity,
            policy,
            stats: StoreStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Score the next sticky entry will start from
    pub fn median_usage(&self) -> f64 {
        self.state.read().median_usage
    }

    /// Look up an entry
    pub fn find(&self, key: &Key) -> Option<Arc<UsageRecord>> {
        self.state.read().entries.get(key).cloned()
    }

    /// Return the entry for `key`, creating a sticky one if it is absent
    ///
    /// Presence is re-checked under the exclusive lock, so concurrent
    /// callers racing on the same new key all get the same entry. Inserting
    /// into a full table runs an eviction pass first.
    pub fn insert_if_absent(&self, key: Key) -> Arc<UsageRecord> {
        let mut state = self.state.write();
        if let Some(existing) = state.entries.get(&key) {
            return Arc::clone(existing);
        }

        self.make_room(&mut state);
        let record = Arc::new(UsageRecord::sticky(key, state.median_usage));
        state.entries.insert(key, Arc::clone(&record));
        record
    }

    /// Insert an entry with known counters (snapshot restore)
    ///
    /// Returns `false` and leaves the table untouched if the key exists.
    pub(crate) fn insert_restored(&self, key: Key, counters: Counters) -> bool {
        let mut state = self.state.write();
        if state.entries.contains_key(&key) {
            return false;
        }

        self.make_room(&mut state);
        state
            .entries
            .insert(key, Arc::new(UsageRecord::with_counters(key, counters)));
        true
    }

    /// Remove an entry; no-op if absent
    pub fn remove(&self, key: &Key) -> bool {
        self.state.write().entries.remove(key).is_some()
    }

    /// Snapshot of all entries, in no particular order
    pub fn iterate(&self) -> Vec<Arc<UsageRecord>> {
        self.state.read().entries.values().cloned().collect()
    }

    /// Current number of live entries
    pub fn count(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Remove every entry, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut state = self.state.write();
        let removed = state.entries.len();
        state.entries.clear();
        removed
    }

    /// Keep only entries for which `keep` returns true
    ///
    /// Runs under the exclusive lock. Returns the number of removed entries.
    pub(crate) fn retain(&self, mut keep: impl FnMut(&UsageRecord) -> bool) -> usize {
        let mut state = self.state.write();
        let before = state.entries.len();
        state.entries.retain(|_, record| keep(record));
        before - state.entries.len()
    }

    /// Evict a batch if the table is full. Caller holds the write lock.
    fn make_room(&self, state: &mut TableState) {
        if state.entries.len() < self.capacity {
            return;
        }
        let victims = self.policy.evict(state);
        self.stats.record_eviction(victims);
        debug!(
            "Evicted {} entries, {} remain, median usage {:.4}",
            victims,
            state.entries.len(),
            state.median_usage
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colorstat_common::{DbId, QueryId, UserId};

    fn key(query: u64) -> Key {
        Key::new(UserId::new(10), DbId::new(1), QueryId::new(query), None)
    }

    #[test]
    fn test_insert_and_find() {
        let table = StatsTable::new(100);
        assert!(table.find(&key(1)).is_none());

        let record = table.insert_if_absent(key(1));
        assert!(record.is_sticky());
        assert_eq!(record.counters().usage, USAGE_INIT);

        let found = table.find(&key(1)).unwrap();
        assert!(Arc::ptr_eq(&record, &found));
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn test_insert_if_absent_returns_existing() {
        let table = StatsTable::new(100);
        let first = table.insert_if_absent(key(1));
        first.increment();

        let second = table.insert_if_absent(key(1));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.counters().calls, 1);
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn test_remove() {
        let table = StatsTable::new(100);
        table.insert_if_absent(key(1));
        table.insert_if_absent(key(2));

        assert!(table.remove(&key(1)));
        assert!(!table.remove(&key(1)));
        assert_eq!(table.count(), 1);
        assert!(table.find(&key(2)).is_some());
    }

    #[test]
    fn test_increment_unsticks() {
        let table = StatsTable::new(100);
        let record = table.insert_if_absent(key(1));
        record.decay(0.99, 0.5);
        assert!(record.counters().usage < USAGE_INIT);

        assert_eq!(record.increment(), 1);
        let c = record.counters();
        assert!(!c.is_sticky());
        assert_eq!(c.usage, USAGE_INIT);

        assert_eq!(record.increment(), 2);
        assert_eq!(record.counters().usage, USAGE_INIT + USAGE_EXEC);
    }

    #[test]
    fn test_decay_rates() {
        let table = StatsTable::new(100);
        let sticky = table.insert_if_absent(key(1));
        let active = table.insert_if_absent(key(2));
        active.increment();

        assert_eq!(sticky.decay(0.99, 0.5).usage, 0.5);
        assert_eq!(active.decay(0.99, 0.5).usage, 0.99);
    }

    #[test]
    fn test_iterate_and_clear() {
        let table = StatsTable::new(100);
        for q in 0..10 {
            table.insert_if_absent(key(q));
        }

        let mut queries: Vec<u64> = table
            .iterate()
            .iter()
            .map(|r| r.key().query_id().get())
            .collect();
        queries.sort_unstable();
        assert_eq!(queries, (0..10).collect::<Vec<_>>());

        assert_eq!(table.clear(), 10);
        assert!(table.is_empty());
    }

    #[test]
    fn test_retain() {
        let table = StatsTable::new(100);
        for q in 0..10 {
            table.insert_if_absent(key(q));
        }
        let removed = table.retain(|r| r.key().query_id().get() % 2 == 0);
        assert_eq!(removed, 5);
        assert_eq!(table.count(), 5);
    }

    #[test]
    fn test_concurrent_insert_same_key() {
        let table = StatsTable::new(100);
        let records: Vec<Arc<UsageRecord>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| table.insert_if_absent(key(42))))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(table.count(), 1);
        assert!(records.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_count_tracks_distinct_keys_below_capacity() {
        let table = StatsTable::new(50);
        for q in 0..50 {
            table.insert_if_absent(key(q));
            table.insert_if_absent(key(q));
            assert_eq!(table.count(), usize::try_from(q + 1).unwrap());
        }
        assert_eq!(table.stats().snapshot(0, 0.0).eviction_passes, 0);
    }
}
