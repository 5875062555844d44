//! Memory store
//!
//! Resident entries are cached behind an `RwLock`; reads only take the read
//! side and record their access with atomics. Reads never evict. Writes go
//! through the backend first with a version check, so a failed write never
//! leaves a half-applied entry behind, and only then replace the resident
//! copy and run an eviction pass.

use sdk::collaborator::MemoryBackend;
use sdk::types::BackendError;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::eviction::{select_victims, Candidate, Clock, EvictionPolicy, SystemClock};
use super::types::{EntryKey, MemoryValue, SessionContext, UserProfile};
use super::MemoryError;
use crate::config::MemoryConfig;
use crate::orchestrator::Turn;

/// Attempts at a conditional write before giving up with `Conflict`
const MAX_CAS_ATTEMPTS: usize = 4;

struct Resident {
    value: Arc<MemoryValue>,
    version: u64,
    size: usize,
    access_count: AtomicU64,
    last_access_ms: AtomicI64,
}

impl Resident {
    fn touch(&self, now_ms: i64) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.last_access_ms.fetch_max(now_ms, Ordering::Relaxed);
    }
}

type PinMap = Arc<StdMutex<HashMap<EntryKey, usize>>>;

/// Keeps an entry out of eviction while held
pub struct PinGuard {
    key: EntryKey,
    pins: PinMap,
}

impl PinGuard {
    pub fn key(&self) -> &EntryKey {
        &self.key
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        let mut pins = self.pins.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = pins.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&self.key);
            }
        }
    }
}

/// Resident size and entry count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub bytes: usize,
    pub entries: usize,
}

/// Bounded, prioritized store for session contexts and user profiles
pub struct MemoryStore {
    backend: Arc<dyn MemoryBackend>,
    policy: EvictionPolicy,
    clock: Arc<dyn Clock>,
    max_turns: usize,
    resident: RwLock<HashMap<EntryKey, Resident>>,
    pins: PinMap,
    /// Held for a whole eviction pass, while taking a pin, and across a
    /// write's backend put and resident install
    eviction: Mutex<()>,
}

impl MemoryStore {
    pub fn new(backend: Arc<dyn MemoryBackend>, config: &MemoryConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        backend: Arc<dyn MemoryBackend>,
        config: &MemoryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            policy: EvictionPolicy::from_config(config),
            clock,
            max_turns: config.max_turns_per_session,
            resident: RwLock::new(HashMap::new()),
            pins: Arc::new(StdMutex::new(HashMap::new())),
            eviction: Mutex::new(()),
        }
    }

    /// Session history for `(user_id, session_id)`; empty if none is stored
    pub async fn get_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<SessionContext, MemoryError> {
        let key = EntryKey::session(user_id, session_id);
        match self.read(&key).await?.as_deref() {
            Some(MemoryValue::Session(ctx)) => Ok(ctx.clone()),
            _ => Ok(SessionContext::new(user_id, session_id, self.max_turns)),
        }
    }

    /// Append a turn to its session
    pub async fn update_session(
        &self,
        user_id: &str,
        session_id: &str,
        turn: &Turn,
    ) -> Result<SessionContext, MemoryError> {
        let key = EntryKey::session(user_id, session_id);
        let value = self
            .modify(&key, |value| match value {
                MemoryValue::Session(ctx) => ctx.push_turn(turn.clone()),
                MemoryValue::Profile(_) => Err(MemoryError::Corrupt(key.to_string())),
            })
            .await?;

        match value.as_ref() {
            MemoryValue::Session(ctx) => Ok(ctx.clone()),
            MemoryValue::Profile(_) => Err(MemoryError::Corrupt(key.to_string())),
        }
    }

    /// Profile for `user_id`; empty if none is stored
    pub async fn get_profile(&self, user_id: &str) -> Result<UserProfile, MemoryError> {
        let key = EntryKey::profile(user_id);
        match self.read(&key).await?.as_deref() {
            Some(MemoryValue::Profile(profile)) => Ok(profile.clone()),
            _ => Ok(UserProfile::new(user_id)),
        }
    }

    /// Record an explicit preference signal
    pub async fn apply_preference(
        &self,
        user_id: &str,
        key: &str,
        value: &str,
    ) -> Result<UserProfile, MemoryError> {
        self.update_profile(user_id, |profile| profile.set_preference(key, value))
            .await
    }

    /// Bump frequency counters for topics mentioned in a turn
    pub async fn record_topics(
        &self,
        user_id: &str,
        topics: &[String],
    ) -> Result<UserProfile, MemoryError> {
        self.update_profile(user_id, |profile| {
            for topic in topics {
                profile.bump(topic);
            }
        })
        .await
    }

    async fn update_profile<F>(&self, user_id: &str, f: F) -> Result<UserProfile, MemoryError>
    where
        F: Fn(&mut UserProfile),
    {
        let key = EntryKey::profile(user_id);
        let value = self
            .modify(&key, |value| match value {
                MemoryValue::Profile(profile) => {
                    f(profile);
                    Ok(())
                }
                MemoryValue::Session(_) => Err(MemoryError::Corrupt(key.to_string())),
            })
            .await?;

        match value.as_ref() {
            MemoryValue::Profile(profile) => Ok(profile.clone()),
            MemoryValue::Session(_) => Err(MemoryError::Corrupt(key.to_string())),
        }
    }

    /// Exclude `key` from eviction until the guard is dropped
    ///
    /// Waits for a running eviction pass to finish, so a pinned entry is never
    /// removed from under its holder.
    pub async fn pin(&self, key: EntryKey) -> PinGuard {
        let _pass = self.eviction.lock().await;
        {
            let mut pins = self.pins.lock().unwrap_or_else(|e| e.into_inner());
            *pins.entry(key.clone()).or_insert(0) += 1;
        }
        PinGuard {
            key,
            pins: Arc::clone(&self.pins),
        }
    }

    pub fn is_pinned(&self, key: &EntryKey) -> bool {
        let pins = self.pins.lock().unwrap_or_else(|e| e.into_inner());
        pins.contains_key(key)
    }

    pub async fn is_resident(&self, key: &EntryKey) -> bool {
        self.resident.read().await.contains_key(key)
    }

    pub async fn usage(&self) -> MemoryUsage {
        let resident = self.resident.read().await;
        MemoryUsage {
            bytes: resident.values().map(|r| r.size).sum(),
            entries: resident.len(),
        }
    }

    /// Evict the lowest-scoring unpinned entries until the store fits its budget
    ///
    /// Returns the evicted keys. Evicted entries are also removed from the
    /// backend.
    pub async fn evict_if_over_capacity(&self) -> Vec<EntryKey> {
        let _pass = self.eviction.lock().await;
        let now = self.clock.now().timestamp_millis();

        let candidates: Vec<Candidate> = {
            let resident = self.resident.read().await;
            let pins = self.pinned_keys();
            resident
                .iter()
                .map(|(key, entry)| {
                    let idle_ms = now - entry.last_access_ms.load(Ordering::Relaxed);
                    Candidate {
                        key: key.clone(),
                        size: entry.size,
                        score: self.policy.score(
                            idle_ms as f64 / 1000.0,
                            entry.access_count.load(Ordering::Relaxed),
                        ),
                        pinned: pins.contains(key),
                    }
                })
                .collect()
        };

        let victims = select_victims(&candidates, self.policy.budget);
        if victims.is_empty() {
            return victims;
        }

        let mut evicted = Vec::with_capacity(victims.len());
        {
            let mut resident = self.resident.write().await;
            for key in victims {
                if resident.remove(&key).is_some() {
                    evicted.push(key);
                }
            }
        }

        for key in &evicted {
            debug!("Evicted memory entry {}", key);
            if let Err(e) = self.backend.delete(&key.storage_key()).await {
                warn!("Failed to delete evicted entry {} from backend: {}", key, e);
            }
        }

        let usage = self.usage().await;
        if !self.policy.budget.admits(usage.bytes, usage.entries) {
            warn!(
                "Memory store still over budget after eviction ({} bytes, {} entries); remaining entries are pinned",
                usage.bytes, usage.entries
            );
        }
        info!("Evicted {} memory entries", evicted.len());

        evicted
    }

    /// Drop an entry from the store and its backend
    pub async fn forget(&self, key: &EntryKey) -> Result<(), MemoryError> {
        self.backend
            .delete(&key.storage_key())
            .await
            .map_err(backend_error)?;
        self.resident.write().await.remove(key);
        Ok(())
    }

    fn pinned_keys(&self) -> HashSet<EntryKey> {
        let pins = self.pins.lock().unwrap_or_else(|e| e.into_inner());
        pins.keys().cloned().collect()
    }

    /// Resident value, falling back to the backend and caching what it returns
    ///
    /// A miss is cached only when no eviction pass or write is in progress;
    /// otherwise the value is returned uncached rather than waiting.
    async fn read(&self, key: &EntryKey) -> Result<Option<Arc<MemoryValue>>, MemoryError> {
        let now = self.clock.now().timestamp_millis();
        {
            let resident = self.resident.read().await;
            if let Some(entry) = resident.get(key) {
                entry.touch(now);
                return Ok(Some(Arc::clone(&entry.value)));
            }
        }

        let record = self
            .backend
            .get(&key.storage_key())
            .await
            .map_err(backend_error)?;

        match record {
            None => Ok(None),
            Some(record) => {
                let size = record.payload.to_string().len();
                let value = Arc::new(self.decode(key, record.payload)?);
                if let Ok(_pass) = self.eviction.try_lock() {
                    self.install(key, Arc::clone(&value), record.version, size)
                        .await;
                }
                Ok(Some(value))
            }
        }
    }

    /// Value and version to base a conditional write on
    async fn load_for_write(
        &self,
        key: &EntryKey,
        fresh: bool,
    ) -> Result<(MemoryValue, Option<u64>), MemoryError> {
        if !fresh {
            let resident = self.resident.read().await;
            if let Some(entry) = resident.get(key) {
                return Ok((entry.value.as_ref().clone(), Some(entry.version)));
            }
        }

        let record = self
            .backend
            .get(&key.storage_key())
            .await
            .map_err(backend_error)?;

        match record {
            Some(record) => Ok((self.decode(key, record.payload)?, Some(record.version))),
            None => Ok((self.empty_value(key), None)),
        }
    }

    /// Stored value with the configured turn window applied
    fn decode(&self, key: &EntryKey, payload: serde_json::Value) -> Result<MemoryValue, MemoryError> {
        let mut value = MemoryValue::from_json(key, payload)?;
        if let MemoryValue::Session(ctx) = &mut value {
            ctx.set_max_turns(self.max_turns);
        }
        Ok(value)
    }

    fn empty_value(&self, key: &EntryKey) -> MemoryValue {
        match key {
            EntryKey::Session {
                user_id,
                session_id,
            } => MemoryValue::Session(SessionContext::new(user_id, session_id, self.max_turns)),
            EntryKey::Profile { user_id } => MemoryValue::Profile(UserProfile::new(user_id)),
        }
    }

    /// Read-modify-write one entry with a version check, retrying on conflict
    async fn modify<F>(&self, key: &EntryKey, mut f: F) -> Result<Arc<MemoryValue>, MemoryError>
    where
        F: FnMut(&mut MemoryValue) -> Result<(), MemoryError>,
    {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let (mut value, version) = self.load_for_write(key, attempt > 0).await?;
            f(&mut value)?;

            let payload = value.to_json()?;
            let size = payload.to_string().len();

            // An eviction pass must not delete the record between put and install
            let pass = self.eviction.lock().await;
            match self.backend.put(&key.storage_key(), payload, version).await {
                Ok(new_version) => {
                    let value = Arc::new(value);
                    self.install(key, Arc::clone(&value), new_version, size)
                        .await;
                    drop(pass);
                    self.evict_if_over_capacity().await;
                    return Ok(value);
                }
                Err(BackendError::Conflict {
                    expected, found, ..
                }) => {
                    debug!(
                        "Version conflict on {} (expected {:?}, found {:?}), attempt {}",
                        key,
                        expected,
                        found,
                        attempt + 1
                    );
                }
                Err(BackendError::Unavailable(e)) => return Err(MemoryError::Unavailable(e)),
            }
        }

        Err(MemoryError::Conflict(key.to_string()))
    }

    /// Replace the resident copy unless a newer version is already cached
    async fn install(&self, key: &EntryKey, value: Arc<MemoryValue>, version: u64, size: usize) {
        let now = self.clock.now().timestamp_millis();
        let mut resident = self.resident.write().await;

        let previous_count = match resident.get(key) {
            Some(existing) if existing.version >= version => {
                existing.touch(now);
                return;
            }
            Some(existing) => existing.access_count.load(Ordering::Relaxed),
            None => 0,
        };

        resident.insert(
            key.clone(),
            Resident {
                value,
                version,
                size,
                access_count: AtomicU64::new(previous_count + 1),
                last_access_ms: AtomicI64::new(now),
            },
        );
    }
}

fn backend_error(err: BackendError) -> MemoryError {
    match err {
        BackendError::Unavailable(e) => MemoryError::Unavailable(e),
        BackendError::Conflict { key, .. } => MemoryError::Conflict(key),
    }
}
