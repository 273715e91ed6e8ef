//! Mercato Core - Entity Store & Semantic Index
//!
//! This crate provides the data management core of the Mercato commerce
//! client: relational persistence for entities, person links and tasks,
//! a chunk-level vector index, and the search coordination that resolves
//! free-text queries back to whole entities ranked by relevance.
//!
//! # Architecture
//!
//! - **Typed models, closed enums**: unknown kind/status/role tags are
//!   rejected at the store boundary
//! - **libsql**: embedded SQLite-compatible database behind an explicit
//!   open/close lifecycle, injected into every store constructor
//! - **Embedding boundary**: all vector production goes through the
//!   `mercato-embed-engine` trait, so backends swap freely in tests
//! - **Single writer per entity**: vector rewrites (delete, re-chunk,
//!   re-embed, re-insert) are sequenced by per-entity locks
//!
//! # Modules
//!
//! - [`models`] - data structures (Entity, PersonLink, Task)
//! - [`db`] - database lifecycle and schema
//! - [`index`] - text chunker and chunk vector index
//! - [`services`] - entity store, search coordinator, search supervisor

pub mod db;
pub mod index;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use models::*;
pub use services::*;
