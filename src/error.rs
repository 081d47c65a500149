//! Error types for Depot.

use thiserror::Error;

use crate::upload::ContainerId;

/// Common error type for Depot.
///
/// Expected upload validation failures are not represented here; they are
/// collected into a [`crate::upload::ValidationResult`] instead. This type
/// covers collaborator-level faults and resolution failures.
#[derive(Error, Debug)]
pub enum DepotError {
    /// Database error.
    ///
    /// Database errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid caller input (malformed size literal, bad request).
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// No free name was found within the retry limit.
    #[error("no free name for {name:?} after {attempts} attempts")]
    NameResolutionExhausted {
        /// The name that was requested.
        name: String,
        /// Number of candidates tried.
        attempts: usize,
    },

    /// The container graph loops back on itself.
    #[error("container hierarchy cycle detected at container {0}")]
    VisibilityCycle(ContainerId),

    /// The record store rejected a name that another writer claimed first.
    #[error("record conflict: {name:?} already exists in container {container}")]
    RecordConflict {
        /// Target container.
        container: ContainerId,
        /// Conflicting logical name.
        name: String,
    },

    /// The content store refused to overwrite existing content.
    #[error("content already exists at {0}")]
    ContentExists(String),
}

impl DepotError {
    /// Whether the caller may simply retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DepotError::RecordConflict { .. } | DepotError::ContentExists(_)
        )
    }
}

impl From<sqlx::Error> for DepotError {
    fn from(e: sqlx::Error) -> Self {
        DepotError::Database(e.to_string())
    }
}

/// Result type alias for Depot operations.
pub type Result<T> = std::result::Result<T, DepotError>;
