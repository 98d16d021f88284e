//! Store adapters.
//!
//! PostgreSQL for production, maps for tests and development; both
//! implement the same repository ports with identical guarded-transition
//! semantics.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
