//! Infrastructure layer - store backends
//!
//! - `memory`: DashMap-backed store (default for tests and ephemeral sessions)
//! - `sqlite`: file or in-memory SQLite database (feature `sqlite`)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
