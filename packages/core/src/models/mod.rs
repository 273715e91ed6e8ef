//! Data Models
//!
//! Core data structures for the commerce entity store:
//!
//! - [`Entity`] - the universal commerce/memory record
//! - [`PersonLink`] - role-tagged edge between a person id and an entity
//! - [`Task`] - derived work item tied to one entity and one assignee
//!
//! All enumerations are closed: unknown tags are rejected at the store
//! boundary instead of being silently defaulted.

mod entity;
mod person_link;
mod task;

use thiserror::Error;

pub use entity::{Entity, EntityFilter, EntityKind, EntityPayload, EntityStatus, EntityUpdate};
pub use person_link::{PersonHit, PersonLink, PersonRole};
pub use task::{Task, TaskKind, TaskPriority, TaskStatus, TaskUpdate};

/// Validation errors for model construction and store writes
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unknown {kind} tag: {value}")]
    UnknownTag { kind: &'static str, value: String },

    #[error("Invalid field value: {0}")]
    InvalidValue(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ValidationError {
    /// Create a missing-field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }

    /// Create an unknown-tag error for a closed enumeration
    pub fn unknown_tag(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownTag {
            kind,
            value: value.into(),
        }
    }

    /// Create an invalid-value error
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }

    /// Create an invalid-configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
