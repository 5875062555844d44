//! Reasoning trace
//!
//! An ordered, append-only record of the steps the orchestrator took during a
//! turn. Steps can be pushed and read but never edited or removed; the trace
//! is returned verbatim inside the Turn so an interface can render it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of orchestrator step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Search,
    Action,
    Synthesis,
    Decision,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Search => "search",
            StepKind::Action => "action",
            StepKind::Synthesis => "synthesis",
            StepKind::Decision => "decision",
        }
    }
}

/// One recorded step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// Position in the trace, starting at 0
    pub index: usize,
    pub kind: StepKind,
    pub description: String,
    pub inputs: Value,
    pub outputs: Value,
    /// 0.0..=1.0
    pub confidence: f32,
    pub at: DateTime<Utc>,
}

impl ReasoningStep {
    /// Error detail recorded in `outputs.error`, if any
    pub fn error(&self) -> Option<&str> {
        self.outputs.get("error").and_then(Value::as_str)
    }
}

/// Append-only sequence of reasoning steps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReasoningTrace {
    steps: Vec<ReasoningStep>,
}

impl ReasoningTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step and return its index
    pub fn push(
        &mut self,
        kind: StepKind,
        description: impl Into<String>,
        inputs: Value,
        outputs: Value,
        confidence: f32,
    ) -> usize {
        let index = self.steps.len();
        self.steps.push(ReasoningStep {
            index,
            kind,
            description: description.into(),
            inputs,
            outputs,
            confidence: confidence.clamp(0.0, 1.0),
            at: Utc::now(),
        });
        index
    }

    /// Append a decision step with no inputs
    pub fn decide(&mut self, description: impl Into<String>, outputs: Value) -> usize {
        self.push(StepKind::Decision, description, Value::Null, outputs, 1.0)
    }

    pub fn steps(&self) -> &[ReasoningStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps of one kind, in order
    pub fn of_kind(&self, kind: StepKind) -> impl Iterator<Item = &ReasoningStep> {
        self.steps.iter().filter(move |s| s.kind == kind)
    }

    /// Steps that carry an error in their outputs
    pub fn failures(&self) -> impl Iterator<Item = &ReasoningStep> {
        self.steps.iter().filter(|s| s.error().is_some())
    }
}
