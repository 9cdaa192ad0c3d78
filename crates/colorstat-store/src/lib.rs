//! colorstat Store - Usage statistics engine
//!
//! This crate implements the usage statistics store including:
//! - A fixed-capacity table shared by all worker threads
//! - Batch eviction ranked by decayed usage scores
//! - Snapshot persistence across restarts
//! - Reconciliation against an external query registry
//! - The [`StatsService`] facade tying it all together
//!
//! # Locking
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ RwLock<TableState>                           │
//! │   shared:    find / iterate / count          │
//! │   exclusive: insert new key / evict / prune  │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ Arc<UsageRecord>                       │  │
//! │  │   Mutex<Counters { calls, usage }>     │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Counter increments only take the record's own mutex, so increments of
//! different keys never contend on the table lock.

pub mod error;
pub mod eviction;
pub mod reconcile;
pub mod service;
pub mod snapshot;
pub mod stats;
pub mod table;

// Re-exports
pub use error::{StoreError, StoreResult};
pub use eviction::{
    EvictionPolicy, MIN_VICTIMS, STICKY_DECAY, USAGE_DECAY, USAGE_EXEC, USAGE_INIT,
    VICTIM_PERCENT,
};
pub use reconcile::{LiveQuery, LiveSet, QueryRegistry, Reconciler, Requester, StaticRegistry};
pub use service::{EntryRow, StatsService};
pub use snapshot::{RECORD_IMAGE_SIZE, SNAPSHOT_MAGIC, SNAPSHOT_VERSION, SnapshotFile};
pub use stats::{StoreStats, StoreStatsSnapshot};
pub use table::{Counters, StatsTable, UsageRecord};
