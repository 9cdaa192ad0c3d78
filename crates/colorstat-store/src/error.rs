//! Statistics store error types

use thiserror::Error;

/// Statistics store error
#[derive(Error, Debug)]
pub enum StoreError {
    /// The service was used after shutdown
    #[error("statistics store is closed")]
    Closed,

    /// Snapshot file could not be decoded
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid store configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error from shared types
    #[error(transparent)]
    Common(#[from] colorstat_common::Error),
}

impl StoreError {
    /// Create a snapshot error
    pub fn snapshot(msg: impl Into<String>) -> Self {
        Self::Snapshot(msg.into())
    }

    /// Check if this error points at a lifecycle bug in the caller
    #[must_use]
    pub const fn is_misuse(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
