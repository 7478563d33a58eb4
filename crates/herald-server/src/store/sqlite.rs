//! Embedded SQLite membership store for single-node deployments.

use async_trait::async_trait;
use herald_core::{MembershipStore, StoreError};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

/// Stores JSON-encoded values in a `key_value` table.
pub struct SqliteStore {
    pool: SqlitePool,
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SqliteStore {
    /// Open (creating if needed) the database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its schema cannot be created.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(backend)?;

        info!(path = %path, "Opened SQLite membership store");
        Self::with_pool(pool).await
    }

    /// Use an existing pool, creating the table if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query("CREATE TABLE IF NOT EXISTS key_value (key VARCHAR(255), value TEXT)")
            .execute(&pool)
            .await
            .map_err(backend)?;
        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS key_index ON key_value (key)")
            .execute(&pool)
            .await
            .map_err(backend)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl MembershipStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT value FROM key_value WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(&value)?;
        sqlx::query("INSERT OR REPLACE INTO key_value (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(encoded)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteStore::with_pool(pool).await.unwrap()
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = memory_store().await;
        assert_eq!(store.get("presence-room:members").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_replaces_value() {
        let store = memory_store().await;
        let key = "presence-room:members";

        store
            .set(key, json!([{"user_id": 1, "user_info": {"name": "Ann"}, "socketId": "a"}]))
            .await
            .unwrap();
        store.set(key, json!([])).await.unwrap();

        assert_eq!(store.get(key).await.unwrap(), Some(json!([])));
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM key_value")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_corrupt_value_is_an_error() {
        let store = memory_store().await;
        sqlx::query("INSERT INTO key_value (key, value) VALUES ('k', 'not json')")
            .execute(&store.pool)
            .await
            .unwrap();
        assert!(matches!(
            store.get("k").await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_open_creates_missing_directories() {
        let root = std::env::temp_dir().join(format!("herald-{}", uuid::Uuid::new_v4()));
        let path = root.join("nested").join("herald.sqlite");

        let store = SqliteStore::open(path.to_str().unwrap()).await.unwrap();
        store.set("k", json!(1)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!(1)));
        assert!(path.exists());

        store.pool.close().await;
        tokio::fs::remove_dir_all(&root).await.unwrap();
    }
}
