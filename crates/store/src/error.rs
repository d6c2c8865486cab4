use common::SagaId;
use domain::DomainError;
use thiserror::Error;

use crate::Version;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The commit unit failed validation and nothing was written.
    #[error("Validation failed: {0}")]
    Validation(#[from] DomainError),

    /// A concurrent journal append for the same saga won the race.
    /// The expected version did not match the actual version.
    #[error("Concurrency conflict for saga {saga_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        saga_id: SagaId,
        expected: Version,
        actual: Version,
    },

    /// A uniqueness rule of the stored data was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A journal entry is missing a required field.
    #[error("Invalid journal entry: {0} is required")]
    InvalidEntry(&'static str),

    /// A stored value could not be mapped back to its domain type.
    #[error("Corrupt {column} value: {value}")]
    Corrupt { column: &'static str, value: String },

    /// The store refused the operation for a reason outside the data itself.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
