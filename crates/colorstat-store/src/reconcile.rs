//! Reconciliation against an external query registry
//!
//! The host keeps its own registry of known queries (keyed by the same
//! `(user, database, query)` triple) and drops queries from it on its own
//! schedule. Before listing, entries whose triple the registry no longer
//! knows are pruned from the table.
//!
//! The registry only reports queries the requester is allowed to see, so
//! entries outside the requester's visibility are never pruned: their
//! absence from the live set says nothing about them.

use crate::table::{StatsTable, UsageRecord};
use colorstat_common::{DbId, QueryId, UserId};
use parking_lot::RwLock;
use std::collections::HashSet;
use tracing::debug;

/// A `(user, database, query)` triple known to the registry
pub type LiveQuery = (UserId, DbId, QueryId);

/// Set of queries the registry currently knows about
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiveSet {
    queries: HashSet<LiveQuery>,
}

impl LiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, query: LiveQuery) -> bool {
        self.queries.insert(query)
    }

    pub fn remove(&mut self, query: &LiveQuery) -> bool {
        self.queries.remove(query)
    }

    pub fn contains(&self, query: &LiveQuery) -> bool {
        self.queries.contains(query)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

impl FromIterator<LiveQuery> for LiveSet {
    fn from_iter<I: IntoIterator<Item = LiveQuery>>(iter: I) -> Self {
        Self {
            queries: iter.into_iter().collect(),
        }
    }
}

/// Identity on whose behalf entries are listed or pruned
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Requester {
    pub user_id: UserId,
    /// May see every user's entries
    pub privileged: bool,
}

impl Requester {
    pub const fn new(user_id: UserId, privileged: bool) -> Self {
        Self {
            user_id,
            privileged,
        }
    }

    /// Whether entries owned by `owner` are visible to this requester
    pub fn can_see(&self, owner: UserId) -> bool {
        self.privileged || self.user_id == owner
    }
}

/// External source of currently live queries
pub trait QueryRegistry: Send + Sync {
    /// Queries visible to `requester`, or `None` if the registry is
    /// unavailable right now
    fn live_queries(&self, requester: &Requester) -> Option<LiveSet>;
}

/// In-memory registry, filtered by requester visibility
#[derive(Debug, Default)]
pub struct StaticRegistry {
    queries: RwLock<LiveSet>,
}

impl StaticRegistry {
    pub fn new(queries: LiveSet) -> Self {
        Self {
            queries: RwLock::new(queries),
        }
    }

    pub fn register(&self, query: LiveQuery) {
        self.queries.write().insert(query);
    }

    pub fn forget(&self, query: &LiveQuery) {
        self.queries.write().remove(query);
    }
}

impl QueryRegistry for StaticRegistry {
    fn live_queries(&self, requester: &Requester) -> Option<LiveSet> {
        Some(
            self.queries
                .read()
                .queries
                .iter()
                .filter(|(user, _, _)| requester.can_see(*user))
                .copied()
                .collect(),
        )
    }
}

/// Prunes table entries the registry no longer knows about
pub struct Reconciler<'a> {
    table: &'a StatsTable,
}

impl<'a> Reconciler<'a> {
    pub fn new(table: &'a StatsTable) -> Self {
        Self { table }
    }

    /// Ask the registry for the live set; `None` disables this pass
    pub fn build_live_set(
        registry: Option<&dyn QueryRegistry>,
        requester: &Requester,
    ) -> Option<LiveSet> {
        registry?.live_queries(requester)
    }

    /// Remove visible entries whose triple is missing from `live`
    ///
    /// Returns the number of pruned entries.
    pub fn prune(&self, live: &LiveSet, requester: &Requester) -> usize {
        let is_stale = |record: &UsageRecord| {
            let key = record.key();
            requester.can_see(key.user_id()) && !live.contains(&key.query_triple())
        };

        // Cheap shared-lock scan first; most passes find nothing to prune
        if !self.table.iterate().iter().any(|r| is_stale(r)) {
            return 0;
        }

        let pruned = self.table.retain(|record| !is_stale(record));
        self.table.stats().record_pruned(pruned);
        debug!("Pruned {} entries missing from the query registry", pruned);
        pruned
    }

    /// Build the live set and prune against it
    pub fn reconcile(&self, registry: Option<&dyn QueryRegistry>, requester: &Requester) -> usize {
        match Self::build_live_set(registry, requester) {
            Some(live) => self.prune(&live, requester),
            None => 0,
        }
    }
}
