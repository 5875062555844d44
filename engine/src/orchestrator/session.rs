//! Session registry
//!
//! Serializes turns per session and tracks whether a session is still open.
//! Each session has its own async lock; turns for different sessions never
//! wait on each other.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::memory::Clock;

/// Why a session can no longer take turns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closure {
    Closed,
    IdleExpired,
}

impl Closure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Closure::Closed => "closed",
            Closure::IdleExpired => "idle_timeout",
        }
    }
}

/// Closed session ids remembered so a late turn is refused instead of
/// silently starting the session again
const CLOSED_SESSIONS_KEPT: usize = 4096;

struct SessionState {
    lock: Arc<Mutex<()>>,
    closed: AtomicBool,
    last_activity_ms: AtomicI64,
}

impl SessionState {
    fn new(now_ms: i64) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            closed: AtomicBool::new(false),
            last_activity_ms: AtomicI64::new(now_ms),
        }
    }
}

/// Exclusive right to run one turn in a session
pub struct SessionLease {
    state: Arc<SessionState>,
    _guard: OwnedMutexGuard<()>,
}

impl SessionLease {
    /// Whether the session was closed after this lease was taken
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

type SessionKey = (String, String);

#[derive(Default)]
struct Sessions {
    live: HashMap<SessionKey, Arc<SessionState>>,
    closed: HashSet<SessionKey>,
    /// Insertion order of `closed`, oldest first
    closed_order: VecDeque<SessionKey>,
}

impl Sessions {
    fn retire(&mut self, key: SessionKey) {
        self.live.remove(&key);
        if self.closed.insert(key.clone()) {
            self.closed_order.push_back(key);
        }
        while self.closed_order.len() > CLOSED_SESSIONS_KEPT {
            if let Some(oldest) = self.closed_order.pop_front() {
                self.closed.remove(&oldest);
            }
        }
    }

    /// Drop idle sessions nobody is using
    fn sweep(&mut self, now_ms: i64, idle_timeout_ms: i64) {
        let stale: Vec<SessionKey> = self
            .live
            .iter()
            .filter(|(_, state)| {
                Arc::strong_count(state) == 1
                    && now_ms - state.last_activity_ms.load(Ordering::SeqCst) > idle_timeout_ms
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            debug!("Sweeping idle session {} of user {}", key.1, key.0);
            self.retire(key);
        }
    }
}

pub struct SessionRegistry {
    sessions: StdMutex<Sessions>,
    idle_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: StdMutex::new(Sessions::default()),
            idle_timeout,
            clock,
        }
    }

    /// Start a session for `user_id` under a fresh random id
    pub fn open(&self, user_id: &str) -> String {
        let session_id = Uuid::new_v4().to_string();
        let _ = self.state_for(user_id, &session_id);
        info!(
            "Opened session {} for user {} ({} active)",
            session_id,
            user_id,
            self.active_count()
        );
        session_id
    }

    /// Wait for the session's turn lock
    ///
    /// Unknown sessions are started implicitly. Closed sessions, and sessions
    /// idle for longer than the timeout, are refused.
    pub async fn acquire(&self, user_id: &str, session_id: &str) -> Result<SessionLease, Closure> {
        let state = self.state_for(user_id, session_id)?;
        let guard = Arc::clone(&state.lock).lock_owned().await;

        if state.closed.load(Ordering::SeqCst) {
            return Err(Closure::Closed);
        }

        let now = self.clock.now().timestamp_millis();
        let idle_ms = now - state.last_activity_ms.load(Ordering::SeqCst);
        if idle_ms > self.idle_timeout_ms() {
            state.closed.store(true, Ordering::SeqCst);
            debug!("Session {} idle for {} ms, expiring", session_id, idle_ms);
            self.lock_sessions()
                .retire((user_id.to_string(), session_id.to_string()));
            return Err(Closure::IdleExpired);
        }

        state.last_activity_ms.store(now, Ordering::SeqCst);
        Ok(SessionLease {
            state,
            _guard: guard,
        })
    }

    /// Mark a session closed; returns false if it was already closed
    ///
    /// Does not wait for a running turn. That turn sees the closure when it
    /// finishes and discards its results.
    pub fn close(&self, user_id: &str, session_id: &str) -> bool {
        let key = (user_id.to_string(), session_id.to_string());
        let mut sessions = self.lock_sessions();
        if sessions.closed.contains(&key) {
            return false;
        }
        if let Some(state) = sessions.live.get(&key) {
            state.closed.store(true, Ordering::SeqCst);
        }
        sessions.retire(key);
        true
    }

    /// Sessions currently tracked as open
    pub fn active_count(&self) -> usize {
        self.lock_sessions().live.len()
    }

    fn state_for(&self, user_id: &str, session_id: &str) -> Result<Arc<SessionState>, Closure> {
        let key = (user_id.to_string(), session_id.to_string());
        let now = self.clock.now().timestamp_millis();
        let mut sessions = self.lock_sessions();

        if sessions.closed.contains(&key) {
            return Err(Closure::Closed);
        }
        if let Some(state) = sessions.live.get(&key) {
            return Ok(Arc::clone(state));
        }

        sessions.sweep(now, self.idle_timeout_ms());
        let state = Arc::new(SessionState::new(now));
        sessions.live.insert(key, Arc::clone(&state));
        Ok(state)
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn idle_timeout_ms(&self) -> i64 {
        self.idle_timeout.as_millis() as i64
    }
}
