//! Bounded conversational memory
//!
//! Session histories and user profiles live in a shared, size-bounded store in
//! front of a persistent `MemoryBackend`. When a write pushes the store over
//! its budget, the lowest-scoring entries that are not pinned by an in-flight
//! turn are evicted until it fits again.

pub mod backend;
pub mod eviction;
pub mod store;
pub mod types;

use sdk::errors::EngineError;
use thiserror::Error;

pub use backend::InMemoryBackend;
pub use eviction::{Budget, Candidate, Clock, EvictionPolicy, ManualClock, SystemClock};
pub use store::{MemoryStore, MemoryUsage, PinGuard};
pub use types::{EntryKey, MemoryValue, SessionContext, UserProfile};

/// Memory subsystem errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("memory backend unavailable: {0}")]
    Unavailable(String),

    #[error("concurrent updates to {0} kept conflicting")]
    Conflict(String),

    #[error("stored entry could not be decoded: {0}")]
    Corrupt(String),

    #[error("entry {key} does not belong to the requesting user")]
    OwnerMismatch { key: String },

    #[error("turn {0} predates the latest turn in its session")]
    OutOfOrder(String),
}

impl From<MemoryError> for EngineError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::Unavailable(e) => EngineError::MemoryUnavailable(e),
            MemoryError::Conflict(key) => EngineError::MemoryConflict(key),
            other => EngineError::Serialization(other.to_string()),
        }
    }
}
