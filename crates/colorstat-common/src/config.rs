//! Configuration types for colorstat
//!
//! This module defines configuration structures used across components.
//! Every section has a `Default` so a partial TOML file is enough.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default maximum number of tracked entries
pub const DEFAULT_CAPACITY: usize = 50_000;

/// Root configuration for colorstat
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Statistics store configuration
    pub store: StoreConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Check values that cannot be expressed through types alone
    pub fn validate(&self) -> Result<()> {
        self.store.validate()
    }
}

/// Statistics store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of entries kept in the table
    pub capacity: usize,
    /// File the table is saved to at shutdown and restored from at startup
    pub snapshot_path: PathBuf,
    /// Save and restore the table across restarts
    pub save: bool,
    /// Record usage at all
    pub track: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            snapshot_path: PathBuf::from("/var/lib/colorstat/colorstat.stat"),
            save: true,
            track: true,
        }
    }
}

impl StoreConfig {
    /// In-memory store of the given capacity: no snapshot file is touched
    #[must_use]
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            capacity,
            save: false,
            ..Default::default()
        }
    }

    /// Store of the given capacity persisted at `snapshot_path`
    #[must_use]
    pub fn with_snapshot(capacity: usize, snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            capacity,
            snapshot_path: snapshot_path.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::configuration("store.capacity must be at least 1"));
        }
        if self.save && self.snapshot_path.as_os_str().is_empty() {
            return Err(Error::configuration(
                "store.snapshot_path must be set when store.save is enabled",
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store.capacity, DEFAULT_CAPACITY);
        assert!(config.store.save);
        assert!(config.store.track);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [store]
            capacity = 128
            snapshot_path = "/tmp/stats.stat"
            "#,
        )
        .unwrap();
        assert_eq!(config.store.capacity, 128);
        assert_eq!(config.store.snapshot_path, PathBuf::from("/tmp/stats.stat"));
        assert!(config.store.track);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = StoreConfig::in_memory(0);
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_validate_requires_snapshot_path() {
        let config = StoreConfig::with_snapshot(10, "");
        assert!(config.validate().is_err());
        assert!(StoreConfig::in_memory(10).validate().is_ok());
    }
}
