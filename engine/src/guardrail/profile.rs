//! Named policy profiles
//!
//! Organizations pick a profile by name instead of tuning individual rules.

use super::{GuardrailError, Severity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyProfile {
    pub name: &'static str,
    pub pii: bool,
    /// Also treat IP addresses as personal data
    pub pii_network_identifiers: bool,
    pub toxicity: bool,
    pub toxicity_redact_at: Severity,
    pub toxicity_block_at: Severity,
    pub access_control: bool,
}

impl PolicyProfile {
    /// Every stage on, low thresholds
    pub fn strict() -> Self {
        Self {
            name: "strict",
            pii: true,
            pii_network_identifiers: true,
            toxicity: true,
            toxicity_redact_at: Severity::Low,
            toxicity_block_at: Severity::Medium,
            access_control: true,
        }
    }

    /// Mild language passes; only serious content is blocked
    pub fn standard() -> Self {
        Self {
            name: "standard",
            pii: true,
            pii_network_identifiers: false,
            toxicity: true,
            toxicity_redact_at: Severity::Medium,
            toxicity_block_at: Severity::High,
            access_control: true,
        }
    }

    pub fn by_name(name: &str) -> Result<Self, GuardrailError> {
        match name {
            "strict" => Ok(Self::strict()),
            "standard" => Ok(Self::standard()),
            other => Err(GuardrailError::UnknownProfile(other.to_string())),
        }
    }
}

impl Default for PolicyProfile {
    fn default() -> Self {
        Self::standard()
    }
}
