//! SQLite memory backend
//!
//! Stores serialized session contexts and user profiles under their entry key.
//! Each row carries a version; writes only land when the caller's expected
//! version matches, which gives the memory store atomic per-entry updates.

use async_trait::async_trait;
use sdk::collaborator::MemoryBackend;
use sdk::types::{BackendError, StoredRecord};
use sqlx::{Row, SqlitePool};

/// `MemoryBackend` over the `memory_entries` table
#[derive(Clone)]
pub struct SqliteMemoryBackend {
    pool: SqlitePool,
}

impl SqliteMemoryBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn current_version(&self, key: &str) -> Result<Option<u64>, BackendError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM memory_entries WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(unavailable)?;
        Ok(version.map(|v| v as u64))
    }
}

fn unavailable(e: sqlx::Error) -> BackendError {
    BackendError::Unavailable(e.to_string())
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl MemoryBackend for SqliteMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<StoredRecord>, BackendError> {
        let row = sqlx::query("SELECT payload, version FROM memory_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        match row {
            None => Ok(None),
            Some(row) => {
                let payload: String = row.get("payload");
                let version: i64 = row.get("version");
                let payload = serde_json::from_str(&payload)
                    .map_err(|e| BackendError::Unavailable(format!("corrupt entry {}: {}", key, e)))?;
                Ok(Some(StoredRecord {
                    payload,
                    version: version as u64,
                }))
            }
        }
    }

    async fn put(
        &self,
        key: &str,
        payload: serde_json::Value,
        expected_version: Option<u64>,
    ) -> Result<u64, BackendError> {
        let text = payload.to_string();

        let (result, new_version) = match expected_version {
            None => {
                let result = sqlx::query(
                    "INSERT INTO memory_entries (key, payload, version, updated_at) \
                     VALUES (?, ?, 1, ?) ON CONFLICT(key) DO NOTHING",
                )
                .bind(key)
                .bind(&text)
                .bind(now_secs())
                .execute(&self.pool)
                .await
                .map_err(unavailable)?;
                (result, 1)
            }
            Some(expected) => {
                let result = sqlx::query(
                    "UPDATE memory_entries SET payload = ?, version = version + 1, updated_at = ? \
                     WHERE key = ? AND version = ?",
                )
                .bind(&text)
                .bind(now_secs())
                .bind(key)
                .bind(expected as i64)
                .execute(&self.pool)
                .await
                .map_err(unavailable)?;
                (result, expected + 1)
            }
        };

        if result.rows_affected() == 1 {
            return Ok(new_version);
        }

        Err(BackendError::Conflict {
            key: key.to_string(),
            expected: expected_version,
            found: self.current_version(key).await?,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM memory_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;
    use tempfile::TempDir;

    async fn backend() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("memory.db")).await.unwrap();
        (temp_dir, db)
    }

    #[tokio::test]
    async fn test_insert_then_conditional_update() {
        let (_dir, db) = backend().await;
        let store = db.memory_backend();

        let v1 = store.put("profile/alice", json!({"a": 1}), None).await.unwrap();
        assert_eq!(v1, 1);

        let v2 = store.put("profile/alice", json!({"a": 2}), Some(1)).await.unwrap();
        assert_eq!(v2, 2);

        let record = store.get("profile/alice").await.unwrap().unwrap();
        assert_eq!(record.payload, json!({"a": 2}));
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let (_dir, db) = backend().await;
        let store = db.memory_backend();

        store.put("k", json!(1), None).await.unwrap();
        store.put("k", json!(2), Some(1)).await.unwrap();

        let err = store.put("k", json!(3), Some(1)).await.unwrap_err();
        assert_eq!(
            err,
            BackendError::Conflict {
                key: "k".to_string(),
                expected: Some(1),
                found: Some(2),
            }
        );

        // Losing writer leaves the stored value untouched
        assert_eq!(store.get("k").await.unwrap().unwrap().payload, json!(2));
    }

    #[tokio::test]
    async fn test_insert_over_existing_conflicts() {
        let (_dir, db) = backend().await;
        let store = db.memory_backend();

        store.put("k", json!(1), None).await.unwrap();
        let err = store.put("k", json!(2), None).await.unwrap_err();
        assert!(matches!(err, BackendError::Conflict { found: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_delete_only_removes_its_key() {
        let (_dir, db) = backend().await;
        let store = db.memory_backend();

        store.put("session/alice/s1", json!({}), None).await.unwrap();
        store.put("session/alice/s2", json!({}), None).await.unwrap();

        store.delete("session/alice/s1").await.unwrap();
        assert!(store.get("session/alice/s1").await.unwrap().is_none());
        assert!(store.get("session/alice/s2").await.unwrap().is_some());
    }
}
