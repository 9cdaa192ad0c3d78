//! Statistics service facade
//!
//! One long-lived [`StatsService`] is shared (usually behind an `Arc`) by
//! every worker that records usage. It owns the table, the snapshot file
//! and the optional query registry, and handles the open/shutdown
//! lifecycle.

use crate::error::{StoreError, StoreResult};
use crate::reconcile::{QueryRegistry, Reconciler, Requester};
use crate::snapshot::SnapshotFile;
use crate::stats::StoreStatsSnapshot;
use crate::table::{StatsTable, UsageRecord};
use colorstat_common::{DbId, Key, QueryId, StoreConfig, UserId};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

/// One row returned by [`StatsService::list_entries`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntryRow {
    pub query_id: QueryId,
    pub user_id: UserId,
    pub db_id: DbId,
    pub tag: Option<String>,
    pub calls: u64,
}

impl EntryRow {
    fn from_record(record: &UsageRecord, calls: u64) -> Self {
        let key = record.key();
        Self {
            query_id: key.query_id(),
            user_id: key.user_id(),
            db_id: key.db_id(),
            tag: key.tag().map(str::to_owned),
            calls,
        }
    }
}

/// Usage statistics service
pub struct StatsService {
    table: StatsTable,
    snapshot: Option<SnapshotFile>,
    registry: Option<Arc<dyn QueryRegistry>>,
    config: StoreConfig,
    closed: AtomicBool,
}

impl StatsService {
    /// Open the service, restoring the previous snapshot when saving is on
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        config
            .validate()
            .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;

        let table = StatsTable::new(config.capacity);
        let snapshot = config
            .save
            .then(|| SnapshotFile::new(&config.snapshot_path));

        let restored = snapshot.as_ref().map_or(0, |file| file.restore(&table));

        info!(
            "Opened statistics store: capacity={}, restored={}, snapshot={:?}, track={}",
            config.capacity,
            restored,
            snapshot.as_ref().map(SnapshotFile::path),
            config.track
        );

        Ok(Self {
            table,
            snapshot,
            registry: None,
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// Open an in-memory service that never touches disk
    pub fn in_memory(capacity: usize) -> StoreResult<Self> {
        Self::open(StoreConfig::in_memory(capacity))
    }

    /// Attach the registry consulted before every listing
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<dyn QueryRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn table(&self) -> &StatsTable {
        &self.table
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Find or create the entry for a key, or `None` when nothing should be
    /// recorded
    fn entry(
        &self,
        user_id: UserId,
        db_id: DbId,
        query_id: QueryId,
        tag: Option<&str>,
    ) -> Option<Arc<UsageRecord>> {
        if !self.config.track {
            return None;
        }
        if self.is_closed() {
            warn!("Dropping usage of query {} on closed statistics store", query_id);
            return None;
        }

        let key = Key::new(user_id, db_id, query_id, tag);
        Some(
            self.table
                .find(&key)
                .unwrap_or_else(|| self.table.insert_if_absent(key)),
        )
    }

    /// Count one completed execution of a query
    pub fn record_usage(&self, user_id: UserId, db_id: DbId, query_id: QueryId, tag: Option<&str>) {
        if let Some(record) = self.entry(user_id, db_id, query_id, tag) {
            record.increment();
        }
    }

    /// Allocate the entry for a query about to run, without counting a call
    ///
    /// The entry stays sticky until [`Self::record_usage`] completes it.
    pub fn reserve(&self, user_id: UserId, db_id: DbId, query_id: QueryId, tag: Option<&str>) {
        self.entry(user_id, db_id, query_id, tag);
    }

    /// List the entries visible to `user_id`
    ///
    /// Entries the registry no longer knows are pruned first. Sticky
    /// entries are never listed.
    pub fn list_entries(&self, user_id: UserId, privileged: bool) -> StoreResult<Vec<EntryRow>> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }

        let requester = Requester::new(user_id, privileged);
        Reconciler::new(&self.table).reconcile(self.registry.as_deref(), &requester);

        let mut rows: Vec<EntryRow> = self
            .table
            .iterate()
            .iter()
            .filter(|record| requester.can_see(record.key().user_id()))
            .filter_map(|record| {
                let counters = record.counters();
                (!counters.is_sticky()).then(|| EntryRow::from_record(record, counters.calls))
            })
            .collect();

        rows.sort_by(|a, b| {
            (a.user_id, a.db_id, a.query_id, &a.tag).cmp(&(b.user_id, b.db_id, b.query_id, &b.tag))
        });
        Ok(rows)
    }

    /// Remove every entry
    pub fn reset(&self) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }

        let removed = self.table.clear();
        self.table.stats().resets.fetch_add(1, Ordering::Relaxed);
        info!("Reset statistics store, removed {} entries", removed);
        Ok(())
    }

    /// Current number of live entries, sticky ones included
    pub fn count(&self) -> usize {
        self.table.count()
    }

    pub fn stats(&self) -> StoreStatsSnapshot {
        self.table
            .stats()
            .snapshot(self.table.count(), self.table.median_usage())
    }

    /// Close the service and write the snapshot
    ///
    /// Returns the number of entries written (0 when saving is off).
    pub fn shutdown(&self) -> StoreResult<usize> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::Closed);
        }

        let written = match &self.snapshot {
            Some(file) => file.write(&self.table)?,
            None => 0,
        };
        info!("Statistics store shut down, {} entries saved", written);
        Ok(written)
    }
}

impl Drop for StatsService {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.shutdown() {
            error!("Failed to save statistics snapshot: {}", e);
        }
    }
}
