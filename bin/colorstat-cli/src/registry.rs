//! Query registry backed by a JSON file
//!
//! The file holds an array of `{"user_id", "db_id", "query_id"}` objects
//! and is re-read on every lookup, so an operator can edit it between runs.

use colorstat_common::{DbId, QueryId, UserId};
use colorstat_store::{LiveSet, QueryRegistry, Requester};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Deserialize)]
struct RegisteredQuery {
    user_id: UserId,
    db_id: DbId,
    query_id: QueryId,
}

pub struct JsonFileRegistry {
    path: PathBuf,
}

impl JsonFileRegistry {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn read(&self) -> anyhow::Result<Vec<RegisteredQuery>> {
        let data = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

impl QueryRegistry for JsonFileRegistry {
    fn live_queries(&self, requester: &Requester) -> Option<LiveSet> {
        match self.read() {
            Ok(queries) => Some(
                queries
                    .into_iter()
                    .filter(|q| requester.can_see(q.user_id))
                    .map(|q| (q.user_id, q.db_id, q.query_id))
                    .collect(),
            ),
            Err(e) => {
                warn!("Query registry {:?} unavailable: {}", self.path, e);
                None
            }
        }
    }
}
