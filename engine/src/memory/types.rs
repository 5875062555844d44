//! Memory entry types
//!
//! Every entry is keyed by its owning user, so no key built for one user can
//! name data belonging to another.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::MemoryError;
use crate::orchestrator::Turn;

/// Key of a memory entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKey {
    Profile { user_id: String },
    Session { user_id: String, session_id: String },
}

impl EntryKey {
    pub fn profile(user_id: &str) -> Self {
        Self::Profile {
            user_id: user_id.to_string(),
        }
    }

    pub fn session(user_id: &str, session_id: &str) -> Self {
        Self::Session {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
        }
    }

    /// User that owns this entry
    pub fn owner(&self) -> &str {
        match self {
            Self::Profile { user_id } | Self::Session { user_id, .. } => user_id,
        }
    }

    /// Key used in the persistent backend
    ///
    /// Components are escaped so that `/` inside an id cannot shift the
    /// boundary between user and session.
    pub fn storage_key(&self) -> String {
        match self {
            Self::Profile { user_id } => format!("profile/{}", escape(user_id)),
            Self::Session {
                user_id,
                session_id,
            } => format!("session/{}/{}", escape(user_id), escape(session_id)),
        }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

fn escape(component: &str) -> String {
    component.replace('%', "%25").replace('/', "%2F")
}

/// Ordered turns of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
    turns: Vec<Turn>,
    /// Turns retained before the oldest are dropped
    max_turns: usize,
    /// Turns ever appended, including dropped ones
    total_turns: u64,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(user_id: &str, session_id: &str, max_turns: usize) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            turns: Vec::new(),
            max_turns: max_turns.max(1),
            total_turns: 0,
            created_at: now,
            last_access: now,
        }
    }

    /// Append a turn, dropping the oldest turns beyond the window
    ///
    /// Fails without modifying the context when the turn belongs to another
    /// user or session, or predates the latest stored turn.
    pub fn push_turn(&mut self, turn: Turn) -> Result<(), MemoryError> {
        if turn.user_id != self.user_id || turn.session_id != self.session_id {
            return Err(MemoryError::OwnerMismatch {
                key: EntryKey::session(&self.user_id, &self.session_id).to_string(),
            });
        }
        if let Some(last) = self.turns.last() {
            if turn.timestamp < last.timestamp {
                return Err(MemoryError::OutOfOrder(turn.turn_id));
            }
        }

        self.last_access = turn.timestamp;
        self.turns.push(turn);
        self.total_turns += 1;
        self.set_max_turns(self.max_turns);
        Ok(())
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Apply a configured window, dropping the oldest turns beyond it
    pub fn set_max_turns(&mut self, max_turns: usize) {
        self.max_turns = max_turns.max(1);
        if self.turns.len() > self.max_turns {
            let excess = self.turns.len() - self.max_turns;
            self.turns.drain(..excess);
        }
    }

    pub fn total_turns(&self) -> u64 {
        self.total_turns
    }
}

/// Per-user preferences and topic frequencies, shared by all of a user's sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub preferences: BTreeMap<String, String>,
    /// Access counters keyed by preference key or topic
    pub frequencies: BTreeMap<String, u64>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            preferences: BTreeMap::new(),
            frequencies: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn set_preference(&mut self, key: &str, value: &str) {
        self.preferences.insert(key.to_string(), value.to_string());
        self.bump(key);
    }

    pub fn preference(&self, key: &str) -> Option<&str> {
        self.preferences.get(key).map(String::as_str)
    }

    pub fn bump(&mut self, key: &str) {
        *self.frequencies.entry(key.to_string()).or_insert(0) += 1;
        self.updated_at = Utc::now();
    }

    /// Most frequent keys, highest first, ties in key order
    pub fn top_topics(&self, n: usize) -> Vec<(&str, u64)> {
        let mut items: Vec<(&str, u64)> = self
            .frequencies
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        items.truncate(n);
        items
    }
}

/// Value of a resident entry
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryValue {
    Session(SessionContext),
    Profile(UserProfile),
}

impl MemoryValue {
    pub fn to_json(&self) -> Result<serde_json::Value, MemoryError> {
        let value = match self {
            Self::Session(s) => serde_json::to_value(s),
            Self::Profile(p) => serde_json::to_value(p),
        };
        value.map_err(|e| MemoryError::Corrupt(e.to_string()))
    }

    /// Decode a stored payload according to the kind its key names
    pub fn from_json(key: &EntryKey, payload: serde_json::Value) -> Result<Self, MemoryError> {
        let value = match key {
            EntryKey::Session { .. } => serde_json::from_value(payload).map(Self::Session),
            EntryKey::Profile { .. } => serde_json::from_value(payload).map(Self::Profile),
        };
        let value = value.map_err(|e| MemoryError::Corrupt(format!("{}: {}", key, e)))?;

        // A payload whose embedded owner disagrees with its key is never served
        if value.owner() != key.owner() {
            return Err(MemoryError::OwnerMismatch {
                key: key.to_string(),
            });
        }
        Ok(value)
    }

    pub fn owner(&self) -> &str {
        match self {
            Self::Session(s) => &s.user_id,
            Self::Profile(p) => &p.user_id,
        }
    }
}
