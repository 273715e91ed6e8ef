//! Database Layer
//!
//! Connection lifecycle and schema management for the libsql store.
//! All SQL for a given concern lives with its service (entity service,
//! vector index); this module only owns the connection, the pragmas and
//! the table definitions.

mod database;
mod error;

pub use database::{format_timestamp, parse_timestamp, DatabaseService};
pub use error::DatabaseError;
