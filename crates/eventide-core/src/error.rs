//! Error types for eventide-core

use thiserror::Error;

use crate::api::ApiError;

/// Result type alias using eventide-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in eventide-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record, queue item or conflict not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote event API error
    #[error("Remote API error: {0}")]
    Api(#[from] ApiError),

    /// Conflict was already resolved and cannot be resolved again
    #[error("Conflict already resolved: {0}")]
    ConflictResolved(String),

    /// Record has an open conflict that must be resolved first
    #[error("Event has an unresolved conflict: {0}")]
    UnresolvedConflict(String),
}
