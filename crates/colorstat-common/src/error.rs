//! Error types for colorstat
//!
//! This module defines the common error types shared by the store and the
//! operator tooling.

use thiserror::Error;

/// Common result type for colorstat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for colorstat
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid color: {0}")]
    InvalidColor(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create an invalid color error
    pub fn invalid_color(msg: impl Into<String>) -> Self {
        Self::InvalidColor(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this error was caused by bad caller input
    #[must_use]
    pub const fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidColor(_) | Self::InvalidArgument(_))
    }
}
