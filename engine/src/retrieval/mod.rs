//! Retrieval synthesis
//!
//! Fans decomposed sub-queries out to the knowledge retriever, then merges the
//! results into one deduplicated, deterministically ranked list. "Searched and
//! found nothing" is an explicit outcome, distinct from "did not search".

pub mod conflict;
pub mod local;
pub mod synthesizer;

use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::types::SensitivityLabel;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use conflict::{detect_conflicts, ClaimSource, Conflict};
pub use local::{CorpusDocument, CorpusRetriever};
pub use synthesizer::{merge, QueryOutcome, RetrievalSynthesizer, Synthesis};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("knowledge retriever unavailable: {0}")]
    Unavailable(String),

    #[error("knowledge retriever timed out after {0} ms")]
    Timeout(u64),
}

impl From<RetrievalError> for EngineError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Unavailable(e) => EngineError::RetrievalUnavailable(e),
            RetrievalError::Timeout(_) => EngineError::RetrievalTimeout,
        }
    }
}

/// A deduplicated passage in its final rank position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPassage {
    pub content: String,
    pub document_id: String,
    pub page_number: u32,
    pub relevance_score: f32,
    pub distance: Option<f32>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub sensitivity: SensitivityLabel,
    /// SHA-256 of the normalized content, hex encoded
    pub content_hash: String,
}

/// Merged retrieval result
#[derive(Debug, Clone, PartialEq)]
pub enum RankedPassages {
    Found(Vec<RankedPassage>),
    /// Every search completed or failed and none yielded a relevant passage
    NoRelevantPassages,
}

impl RankedPassages {
    pub fn passages(&self) -> &[RankedPassage] {
        match self {
            RankedPassages::Found(p) => p,
            RankedPassages::NoRelevantPassages => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RankedPassages::NoRelevantPassages)
    }
}
