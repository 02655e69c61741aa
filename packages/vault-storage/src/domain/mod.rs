//! Domain layer for the durable store
//!
//! # Port Trait
//!
//! - `DurableStore`: single-key get/set/remove/keys over JSON values.
//!   No cross-key transactions; each write is atomic for its key only.
//! - `DurableStoreExt`: typed helpers layered on any store.
//!
//! # Examples
//!
//! ```rust,ignore
//! use vault_storage::{DurableStore, DurableStoreExt, MemoryStore};
//!
//! async fn example(store: &dyn DurableStore) -> vault_storage::Result<()> {
//!     store.set_as("task-1", &task).await?;
//!     let loaded: Option<Task> = store.get_as("task-1").await?;
//!     for key in store.keys().await? {
//!         store.remove(&key).await?;
//!     }
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::Result;

/// Key under which the schema version is recorded in the metadata store
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait
// ═══════════════════════════════════════════════════════════════════════════

/// Durable key-value store.
///
/// Values are JSON documents. Implementations must return `keys()` in
/// ascending lexical order so that callers iterating the store see a stable
/// ordering.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Human-readable namespace for logs
    fn namespace(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<()>;

    async fn keys(&self) -> Result<Vec<String>>;

    /// Remove every key in this namespace
    async fn clear(&self) -> Result<()> {
        for key in self.keys().await? {
            self.remove(&key).await?;
        }
        Ok(())
    }
}

/// Typed access on top of [`DurableStore`]
#[async_trait]
pub trait DurableStoreExt: DurableStore {
    async fn get_as<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn set_as<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value)?;
        self.set(key, value).await
    }
}

impl<S: DurableStore + ?Sized> DurableStoreExt for S {}

/// Ensure the cache namespace matches the expected schema version.
///
/// When the version recorded in `meta` differs from `version`, every entry in
/// `cache` is removed and the new version is recorded. Returns `true` when the
/// cache was cleared.
pub async fn ensure_schema_version(
    meta: &dyn DurableStore,
    cache: &dyn DurableStore,
    version: u32,
) -> Result<bool> {
    let stored = meta.get_as::<u32>(SCHEMA_VERSION_KEY).await?;

    if stored == Some(version) {
        return Ok(false);
    }

    info!(
        "Schema version changed ({:?} -> {}), clearing namespace '{}'",
        stored,
        version,
        cache.namespace()
    );
    cache.clear().await?;
    meta.set_as(SCHEMA_VERSION_KEY, &version).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        name: String,
        score: u32,
    }

    #[tokio::test]
    async fn test_typed_roundtrip() {
        let store = MemoryStore::new("test");
        let entry = Entry {
            name: "Get".to_string(),
            score: 3,
        };

        store.set_as("k", &entry).await.unwrap();
        let loaded: Option<Entry> = store.get_as("k").await.unwrap();
        assert_eq!(loaded, Some(entry));
    }

    #[tokio::test]
    async fn test_get_as_wrong_shape_is_serialization_error() {
        let store = MemoryStore::new("test");
        store.set("k", json!("not an entry")).await.unwrap();

        let err = store.get_as::<Entry>("k").await.unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Serialization);
    }

    #[tokio::test]
    async fn test_schema_version_first_run_clears() {
        let meta = MemoryStore::new("meta");
        let cache = MemoryStore::new("cache");
        cache.set("stale", json!(1)).await.unwrap();

        assert!(ensure_schema_version(&meta, &cache, 1).await.unwrap());
        assert!(cache.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schema_version_same_keeps_entries() {
        let meta = MemoryStore::new("meta");
        let cache = MemoryStore::new("cache");
        ensure_schema_version(&meta, &cache, 2).await.unwrap();

        cache.set("entry", json!({"data": 1})).await.unwrap();
        assert!(!ensure_schema_version(&meta, &cache, 2).await.unwrap());
        assert_eq!(cache.keys().await.unwrap(), vec!["entry".to_string()]);
    }

    #[tokio::test]
    async fn test_schema_version_bump_clears() {
        let meta = MemoryStore::new("meta");
        let cache = MemoryStore::new("cache");
        ensure_schema_version(&meta, &cache, 1).await.unwrap();
        cache.set("entry", json!({"data": 1})).await.unwrap();

        assert!(ensure_schema_version(&meta, &cache, 2).await.unwrap());
        assert!(cache.keys().await.unwrap().is_empty());
        assert_eq!(meta.get(SCHEMA_VERSION_KEY).await.unwrap(), Some(json!(2)));
    }
}
