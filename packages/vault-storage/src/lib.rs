//! Durable key-value storage for the delivery vault
//!
//! The cache and the delivery queue each live in their own namespace of a
//! [`DurableStore`]. Only the shape of the stored JSON documents matters to
//! callers; the backends here are interchangeable.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vault_storage::{DurableStore, MemoryStore, SqliteStore};
//!
//! let cache = SqliteStore::open("vault.db", "cache")?;
//! let queue = cache.with_namespace("queue");
//! vault_storage::ensure_schema_version(&meta, &cache, 1).await?;
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{ensure_schema_version, DurableStore, DurableStoreExt, SCHEMA_VERSION_KEY};
pub use infrastructure::MemoryStore;

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteStore;
