//! Access control stage
//!
//! Output segments drawn from a document labelled above the caller's
//! clearance are blocked. Input carries no source label and is not checked.

use super::{Direction, FilterContext, GuardrailStage, Segment, Severity, StageVerdict};
use sdk::types::SensitivityLabel;

#[derive(Debug, Default)]
pub struct AccessControlStage;

impl AccessControlStage {
    pub fn new() -> Self {
        Self
    }
}

impl GuardrailStage for AccessControlStage {
    fn name(&self) -> &'static str {
        "access_control"
    }

    fn applies_to(&self, direction: Direction) -> bool {
        direction == Direction::Output
    }

    fn check(&self, segment: &Segment, ctx: &FilterContext) -> StageVerdict {
        match segment.label {
            Some(label) if label > ctx.clearance => StageVerdict::Block {
                severity: if label == SensitivityLabel::Restricted {
                    Severity::Critical
                } else {
                    Severity::High
                },
                category: "sensitivity",
            },
            _ => StageVerdict::Pass,
        }
    }
}
