//! SQLite adapter for DurableStore
//!
//! One table holds every namespace; rows are keyed by `(namespace, key)` and
//! carry the JSON text of the value plus the time of the last write. Several
//! stores can share one connection through [`SqliteStore::with_namespace`].

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::domain::DurableStore;
use crate::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_entries (
    namespace  TEXT NOT NULL,
    key        TEXT NOT NULL,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (namespace, key)
);
"#;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    namespace: String,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>, namespace: impl Into<String>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        debug!("Opened SQLite store at {}", path.as_ref().display());
        Self::from_connection(conn, namespace)
    }

    pub fn new_in_memory(namespace: impl Into<String>) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, namespace)
    }

    fn from_connection(conn: Connection, namespace: impl Into<String>) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            namespace: namespace.into(),
        })
    }

    /// Another namespace over the same connection
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            conn: self.conn.clone(),
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let text: Option<String> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT value FROM kv_entries WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
                |row| row.get(0),
            )
            .optional()?
        };

        match text {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let text = serde_json::to_string(&value)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv_entries (namespace, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(namespace, key) DO UPDATE
             SET value = excluded.value, updated_at = excluded.updated_at",
            params![self.namespace, key, text, Utc::now()],
        )?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM kv_entries WHERE namespace = ?1 AND key = ?2",
            params![self.namespace, key],
        )?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT key FROM kv_entries WHERE namespace = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![self.namespace], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }

    async fn clear(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM kv_entries WHERE namespace = ?1",
            params![self.namespace],
        )?;
        Ok(())
    }
}
