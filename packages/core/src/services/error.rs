//! Service Layer Error Types
//!
//! High-level error taxonomy for store and search operations.
//!
//! Propagation policy: the entity store and vector index raise these to
//! their caller; the search coordinator never raises not-found or
//! stale-reference conditions upward - it drops the dangling record and
//! keeps searching. A superseded search is discarded by the supervisor,
//! not reported as an error.

use crate::db::DatabaseError;
use crate::index::IndexError;
use crate::models::ValidationError;
use mercato_embed_engine::EmbedError;
use thiserror::Error;

/// Service operation errors
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Operation targets a nonexistent id. Raised by updates; idempotent
    /// deletes treat absence as success instead.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Malformed or missing required input; never retried automatically
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Illegal state transition (e.g. updating a completed task)
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    /// Database operation failed
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    /// Vector index operation failed
    #[error("Index operation failed: {0}")]
    Index(#[from] IndexError),

    /// Embedding backend failed; retryable when the backend reports
    /// itself unavailable
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Query execution error
    #[error("Query failed: {0}")]
    QueryFailed(String),
}

impl ServiceError {
    /// Create a not-found error
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create an invalid update error
    pub fn invalid_update(msg: impl Into<String>) -> Self {
        Self::InvalidUpdate(msg.into())
    }

    /// Create a serialization error
    pub fn serialization_error(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a query failed error
    pub fn query_failed(msg: impl Into<String>) -> Self {
        Self::QueryFailed(msg.into())
    }

    /// Whether the operation may succeed on retry (provider temporarily
    /// unreachable, lock contention).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Embedding(EmbedError::Unavailable(_))
                | Self::Index(IndexError::Embedding(EmbedError::Unavailable(_)))
        )
    }
}
