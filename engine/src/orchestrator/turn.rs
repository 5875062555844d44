//! Turn records
//!
//! A `Turn` is what `process_turn` returns and what a session's history
//! stores. Everything a UI needs to render an answer, its sources and its
//! explanation is on this one record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::actions::{ActionErrorKind, ActionInvocation};
use crate::guardrail::Incident;
use crate::trace::ReasoningTrace;

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Answered,
    /// Input was blocked, or output filtering would have removed the whole answer
    PolicyViolation,
    /// The session was closed or idle-expired; any in-flight work was discarded
    SessionExpired,
}

impl fmt::Display for TurnOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TurnOutcome::Answered => "answered",
            TurnOutcome::PolicyViolation => "policy_violation",
            TurnOutcome::SessionExpired => "session_expired",
        })
    }
}

/// Failure taxonomy for a turn
///
/// Only `InputBlocked` and `SessionExpired` end a turn. Every other kind is
/// recorded on the trace and acknowledged in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputBlocked,
    OutputRedacted,
    RetrievalUnavailable,
    ActionNotFound,
    ActionValidationFailed,
    ActionExecutionFailed,
    MemoryUnavailable,
    SessionExpired,
}

impl ErrorKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ErrorKind::InputBlocked | ErrorKind::SessionExpired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InputBlocked => "input_blocked",
            ErrorKind::OutputRedacted => "output_redacted",
            ErrorKind::RetrievalUnavailable => "retrieval_unavailable",
            ErrorKind::ActionNotFound => "action_not_found",
            ErrorKind::ActionValidationFailed => "action_validation_failed",
            ErrorKind::ActionExecutionFailed => "action_execution_failed",
            ErrorKind::MemoryUnavailable => "memory_unavailable",
            ErrorKind::SessionExpired => "session_expired",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ActionErrorKind> for ErrorKind {
    fn from(kind: ActionErrorKind) -> Self {
        match kind {
            ActionErrorKind::ActionNotFound => ErrorKind::ActionNotFound,
            ActionErrorKind::ActionValidationFailed => ErrorKind::ActionValidationFailed,
            ActionErrorKind::ActionExecutionFailed => ErrorKind::ActionExecutionFailed,
        }
    }
}

/// Pages of one source document the response draws on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: String,
    /// Ascending, without duplicates
    pub pages: Vec<u32>,
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pages: Vec<String> = self.pages.iter().map(u32::to_string).collect();
        let label = if self.pages.len() == 1 { "p." } else { "pp." };
        write!(f, "{}, {} {}", self.document_id, label, pages.join(", "))
    }
}

/// One user input and everything produced for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: String,
    pub session_id: String,
    pub user_id: String,
    pub raw_input: String,
    /// Input after guardrail redaction; what retrieval and actions saw
    pub filtered_input: String,
    pub response: String,
    pub outcome: TurnOutcome,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub actions: Vec<ActionInvocation>,
    #[serde(default)]
    pub trace: ReasoningTrace,
    #[serde(default)]
    pub incidents: Vec<Incident>,
    /// Non-fatal and fatal failures met during the turn, in order
    #[serde(default)]
    pub errors: Vec<ErrorKind>,
    /// Memory was unavailable and the turn ran on turn-scoped state
    #[serde(default)]
    pub memory_degraded: bool,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub(crate) fn begin(user_id: &str, session_id: &str, raw_input: &str) -> Self {
        Self {
            turn_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            raw_input: raw_input.to_string(),
            filtered_input: raw_input.to_string(),
            response: String::new(),
            outcome: TurnOutcome::Answered,
            citations: Vec::new(),
            actions: Vec::new(),
            trace: ReasoningTrace::new(),
            incidents: Vec::new(),
            errors: Vec::new(),
            memory_degraded: false,
            timestamp: Utc::now(),
        }
    }

    /// A minimal answered turn, for seeding histories
    pub fn stub(user_id: &str, session_id: &str, input: &str) -> Self {
        let mut turn = Self::begin(user_id, session_id, input);
        turn.response = format!("(answer to: {})", input);
        turn
    }

    /// Copy to persist in session history
    ///
    /// The unredacted input is never written to memory; history keeps the
    /// filtered text in both fields.
    pub fn for_history(&self) -> Self {
        let mut turn = self.clone();
        turn.raw_input = turn.filtered_input.clone();
        turn
    }

    pub(crate) fn record_error(&mut self, kind: ErrorKind) {
        self.errors.push(kind);
    }

    pub fn has_error(&self, kind: ErrorKind) -> bool {
        self.errors.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_blocking_and_expiry_are_terminal() {
        assert!(ErrorKind::InputBlocked.is_terminal());
        assert!(ErrorKind::SessionExpired.is_terminal());
        assert!(!ErrorKind::MemoryUnavailable.is_terminal());
        assert!(!ErrorKind::ActionExecutionFailed.is_terminal());
        assert!(!ErrorKind::OutputRedacted.is_terminal());
    }

    #[test]
    fn test_history_copy_drops_raw_input() {
        let mut turn = Turn::stub("alice", "s1", "mail bob@example.com");
        turn.filtered_input = "mail [REDACTED:email]".to_string();

        let stored = turn.for_history();
        assert_eq!(stored.raw_input, "mail [REDACTED:email]");
        assert_eq!(stored.turn_id, turn.turn_id);
    }

    #[test]
    fn test_citation_display() {
        let one = Citation {
            document_id: "handbook".to_string(),
            pages: vec![3],
        };
        let many = Citation {
            document_id: "faq".to_string(),
            pages: vec![1, 4],
        };
        assert_eq!(one.to_string(), "handbook, p. 3");
        assert_eq!(many.to_string(), "faq, pp. 1, 4");
    }

    #[test]
    fn test_turn_serializes_outcome_snake_case() {
        let turn = Turn::stub("alice", "s1", "hi");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["outcome"], "answered");
    }
}
