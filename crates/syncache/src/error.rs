//! Error types for syncache
//!
//! Loader failures are not represented here: `get_or_load` hands back the
//! loader's own error type untouched.

use thiserror::Error;

/// Result type alias for syncache setup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building a cache
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A configuration value is out of range
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),
}
