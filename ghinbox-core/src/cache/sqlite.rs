use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::StoreError;

use super::traits::{KvStore, StoreName};

/// Current on-disk layout version.
pub const SCHEMA_VERSION: &str = "1";

/// SQLite-backed implementation of [`KvStore`]: one table per [`StoreName`].
#[derive(Debug)]
pub struct SqliteKv {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteKv {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> crate::error::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> crate::error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> crate::error::Result<()> {
        let conn = self.conn.lock().expect("kv store mutex poisoned");

        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -16000;",
        )
        .map_err(StoreError::Sqlite)?;

        // Ignored for in-memory databases
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");

        conn.execute_batch(&schema_sql()).map_err(StoreError::Sqlite)?;
        conn.execute(
            "INSERT OR IGNORE INTO ghinbox_meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION],
        )
        .map_err(StoreError::Sqlite)?;

        Ok(())
    }
}

fn schema_sql() -> String {
    let mut sql = String::from(
        "CREATE TABLE IF NOT EXISTS ghinbox_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );\n",
    );
    for store in StoreName::ALL {
        let _ = writeln!(
            sql,
            "CREATE TABLE IF NOT EXISTS {store} (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );"
        );
    }
    sql
}

#[async_trait::async_trait]
impl KvStore for SqliteKv {
    async fn get(
        &self,
        store: StoreName,
        key: &str,
    ) -> crate::error::Result<Option<serde_json::Value>> {
        let conn = self.conn.lock().expect("kv store mutex poisoned");
        let raw: Option<String> = conn
            .query_row(
                &format!("SELECT value FROM {store} WHERE key = ?1"),
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::Sqlite)?;
        match raw {
            Some(text) => Ok(Some(
                serde_json::from_str(&text).map_err(StoreError::Serialization)?,
            )),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        store: StoreName,
        key: &str,
        value: &serde_json::Value,
    ) -> crate::error::Result<()> {
        let text = serde_json::to_string(value).map_err(StoreError::Serialization)?;
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().expect("kv store mutex poisoned");
        conn.execute(
            &format!(
                "INSERT INTO {store} (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"
            ),
            params![key, text, now],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn count(&self, store: StoreName) -> crate::error::Result<u64> {
        let conn = self.conn.lock().expect("kv store mutex poisoned");
        let n: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {store}"), [], |row| {
                row.get(0)
            })
            .map_err(StoreError::Sqlite)?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    fn location(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn put_get_and_overwrite() {
        let kv = SqliteKv::in_memory().unwrap();
        assert!(kv.get(StoreName::Users, "bob").await.unwrap().is_none());

        kv.put(StoreName::Users, "bob", &json!({"login": "bob"}))
            .await
            .unwrap();
        kv.put(StoreName::Users, "bob", &json!({"login": "bob", "id": 2}))
            .await
            .unwrap();

        assert_eq!(
            kv.get(StoreName::Users, "bob").await.unwrap(),
            Some(json!({"login": "bob", "id": 2}))
        );
        assert_eq!(kv.count(StoreName::Users).await.unwrap(), 1);
        assert_eq!(kv.count(StoreName::Issues).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ghinbox.db");

        {
            let kv = SqliteKv::open(&path).unwrap();
            kv.put(StoreName::Checkpoints, "notifications", &json!("2024-03-01T00:00:00Z"))
                .await
                .unwrap();
            assert_eq!(kv.location(), Some(path.as_path()));
        }

        let kv = SqliteKv::open(&path).unwrap();
        assert_eq!(
            kv.get(StoreName::Checkpoints, "notifications").await.unwrap(),
            Some(json!("2024-03-01T00:00:00Z"))
        );
    }

    #[test]
    fn open_fails_on_directory_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SqliteKv::open(dir.path()).is_err());
    }
}
