//! colorstat Common - Shared types and utilities
//!
//! This crate provides the identifier types, the composite statistics key,
//! the color tag renderer, configuration structures and the common error
//! type used across all colorstat components.

pub mod color;
pub mod config;
pub mod error;
pub mod types;

pub use color::Color;
pub use config::{Config, LoggingConfig, StoreConfig};
pub use error::{Error, Result};
pub use types::*;
