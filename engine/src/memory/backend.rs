//! In-process memory backend
//!
//! Same conditional-update semantics as the SQLite backend, held in a map.
//! Used for `backend = "memory"` and for tests, which can switch it offline
//! to exercise degraded turns.

use async_trait::async_trait;
use sdk::collaborator::MemoryBackend;
use sdk::types::{BackendError, StoredRecord};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    records: Mutex<HashMap<String, StoredRecord>>,
    offline: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `Unavailable` until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.records.lock().await.contains_key(key)
    }

    fn check_online(&self) -> Result<(), BackendError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("backend offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<StoredRecord>, BackendError> {
        self.check_online()?;
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn put(
        &self,
        key: &str,
        payload: serde_json::Value,
        expected_version: Option<u64>,
    ) -> Result<u64, BackendError> {
        self.check_online()?;
        let mut records = self.records.lock().await;

        let found = records.get(key).map(|r| r.version);
        if found != expected_version {
            return Err(BackendError::Conflict {
                key: key.to_string(),
                expected: expected_version,
                found,
            });
        }

        let version = found.unwrap_or(0) + 1;
        records.insert(key.to_string(), StoredRecord { payload, version });
        Ok(version)
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.check_online()?;
        self.records.lock().await.remove(key);
        Ok(())
    }
}
