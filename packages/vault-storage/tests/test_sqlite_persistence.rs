//! SQLite persistence across reopen
#![cfg(feature = "sqlite")]

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use vault_storage::{ensure_schema_version, DurableStore, SqliteStore};

#[tokio::test]
async fn test_entries_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vault.db");

    {
        let queue = SqliteStore::open(&path, "queue").unwrap();
        queue
            .set("2024-01-01T00:00:00Z-1-abcd1234", json!({"mutationName": "Save"}))
            .await
            .unwrap();
    }

    let queue = SqliteStore::open(&path, "queue").unwrap();
    assert_eq!(
        queue.keys().await.unwrap(),
        vec!["2024-01-01T00:00:00Z-1-abcd1234".to_string()]
    );
    assert_eq!(
        queue
            .get("2024-01-01T00:00:00Z-1-abcd1234")
            .await
            .unwrap(),
        Some(json!({"mutationName": "Save"}))
    );
}

#[tokio::test]
async fn test_schema_bump_clears_only_cache() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vault.db");

    let meta = SqliteStore::open(&path, "meta").unwrap();
    let cache = meta.with_namespace("cache");
    let queue = meta.with_namespace("queue");

    ensure_schema_version(&meta, &cache, 1).await.unwrap();
    cache.set("QUERY_abc", json!({"score": 1})).await.unwrap();
    queue.set("task", json!({"status": "eventual"})).await.unwrap();

    let cleared = ensure_schema_version(&meta, &cache, 2).await.unwrap();

    assert!(cleared);
    assert!(cache.keys().await.unwrap().is_empty());
    assert_eq!(queue.keys().await.unwrap(), vec!["task".to_string()]);
}
