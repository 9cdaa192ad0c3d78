//! Replay a recorded workload against the store
//!
//! Input is JSON lines, one usage event per line. Blank lines are skipped.

use anyhow::{Context, Result};
use colorstat_common::{DbId, QueryId, UserId};
use colorstat_store::StatsService;
use serde::Deserialize;
use std::io::BufRead;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UsageEvent {
    pub user_id: UserId,
    pub db_id: DbId,
    pub query_id: QueryId,
    #[serde(default)]
    pub tag: Option<String>,
}

pub fn parse_events(reader: impl BufRead) -> Result<Vec<UsageEvent>> {
    let mut events = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line)
            .with_context(|| format!("invalid event on line {}", line_no + 1))?;
        events.push(event);
    }
    Ok(events)
}

/// Record every event, spreading them over `threads` workers
pub fn replay(service: &StatsService, events: &[UsageEvent], threads: usize) {
    if events.is_empty() {
        return;
    }
    let chunk = events.len().div_ceil(threads.max(1));
    std::thread::scope(|s| {
        for part in events.chunks(chunk) {
            s.spawn(move || {
                for e in part {
                    service.record_usage(e.user_id, e.db_id, e.query_id, e.tag.as_deref());
                }
            });
        }
    });
}
