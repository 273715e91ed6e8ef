//! Business Services
//!
//! - `EntityService` - CRUD, relational queries, stats and the indexing
//!   pipeline for entities, person links and tasks
//! - `SearchService` - chunk-to-entity ranked semantic search
//! - `SearchSupervisor` - debounced, cancellable query execution
//! - `seed` - best-effort demo catalog seeding
//!
//! Services coordinate between the database layer, the vector index and
//! application logic, implementing business rules and orchestrating
//! multi-step operations.

pub mod entity_service;
pub mod error;
pub mod search_service;
pub mod search_supervisor;
pub mod seed;

pub use entity_service::{BulkFailure, BulkOutcome, EntityService, StoreStats};
pub use error::ServiceError;
pub use search_service::{SearchService, OVERFETCH_FACTOR};
pub use search_supervisor::{
    SearchOutcome, SearchSupervisor, SearchSupervisorConfig,
};
pub use seed::seed_demo_data;
