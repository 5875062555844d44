//! Wire types exchanged with collaborators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Sensitivity label attached to a source document.
///
/// Labels are ordered: a caller with clearance `Confidential` may see
/// `Public`, `Internal` and `Confidential` material but not `Restricted`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityLabel {
    #[default]
    Public,
    Internal,
    Confidential,
    Restricted,
}

impl SensitivityLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Internal => "internal",
            Self::Confidential => "confidential",
            Self::Restricted => "restricted",
        }
    }
}

impl fmt::Display for SensitivityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensitivityLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "internal" => Ok(Self::Internal),
            "confidential" => Ok(Self::Confidential),
            "restricted" => Ok(Self::Restricted),
            other => Err(format!("unknown sensitivity label '{}'", other)),
        }
    }
}

/// A passage as returned by a knowledge retriever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPassage {
    pub content: String,
    pub document_id: String,
    pub page_number: u32,
    pub relevance_score: f32,

    /// Distance in embedding space, when the retriever exposes it
    #[serde(default)]
    pub distance: Option<f32>,

    /// Upload time of the source document
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub sensitivity: SensitivityLabel,
}

impl RawPassage {
    /// Create a passage with default metadata
    pub fn new(
        content: impl Into<String>,
        document_id: impl Into<String>,
        page_number: u32,
        relevance_score: f32,
    ) -> Self {
        Self {
            content: content.into(),
            document_id: document_id.into(),
            page_number,
            relevance_score,
            distance: None,
            uploaded_at: None,
            sensitivity: SensitivityLabel::Public,
        }
    }

    pub fn uploaded(mut self, at: DateTime<Utc>) -> Self {
        self.uploaded_at = Some(at);
        self
    }

    pub fn labelled(mut self, label: SensitivityLabel) -> Self {
        self.sensitivity = label;
        self
    }
}

/// Transport-level failure from a knowledge retriever.
///
/// "No results" is never an error: retrievers return an empty sequence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetrieverError {
    #[error("retriever transport failure: {0}")]
    Transport(String),
}

/// Failure reported by an external action endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EndpointError {
    /// Connection, 5xx or other transient failure; eligible for retry
    #[error("transport failure: {0}")]
    Transport(String),

    /// The endpoint understood the request and refused it; never retried
    #[error("rejected by endpoint: {0}")]
    Rejected(String),
}

impl EndpointError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// A record held by a memory backend together with its version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub payload: serde_json::Value,
    pub version: u64,
}

/// Failure reported by a memory backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The stored version did not match the expected one
    #[error("version conflict on key {key}: expected {expected:?}, found {found:?}")]
    Conflict {
        key: String,
        expected: Option<u64>,
        found: Option<u64>,
    },
}
