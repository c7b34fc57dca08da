//! Error types for ttlstore

use thiserror::Error;

/// Result type alias for ttlstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the conditional write operations (`add`, `replace`).
///
/// Plain `get`/`set`/`delete`/`flush` never fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// `add` found a live item under the key
    #[error("item {0:?} already exists")]
    AlreadyExists(String),

    /// `replace` found no live item under the key
    #[error("item {0:?} not found")]
    NotFound(String),
}
