//! PII detection stage
//!
//! Finds email addresses, phone numbers, US social security numbers and
//! payment card numbers (Luhn-checked). The strict profile also treats IPv4
//! addresses as personal data. Matches are always redacted, never blocked.

use regex::Regex;

use super::{Direction, FilterContext, GuardrailStage, Redaction, Segment, Severity, StageVerdict};

struct PiiPattern {
    category: &'static str,
    severity: Severity,
    regex: Regex,
    /// Extra check on the matched text
    validate: Option<fn(&str) -> bool>,
}

pub struct PiiStage {
    patterns: Vec<PiiPattern>,
}

impl PiiStage {
    pub fn new(network_identifiers: bool) -> Result<Self, regex::Error> {
        let mut patterns = vec![
            PiiPattern {
                category: "email",
                severity: Severity::Medium,
                regex: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")?,
                validate: None,
            },
            PiiPattern {
                category: "card_number",
                severity: Severity::High,
                regex: Regex::new(r"\b(?:\d[ -]?){12,18}\d\b")?,
                validate: Some(luhn_valid),
            },
            PiiPattern {
                category: "ssn",
                severity: Severity::High,
                regex: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b")?,
                validate: None,
            },
            PiiPattern {
                category: "phone",
                severity: Severity::Medium,
                regex: Regex::new(r"(?:\+\d{1,3}[ .-]?)?(?:\(\d{3}\)|\b\d{3})[ .-]?\d{3}[ .-]\d{4}\b")?,
                validate: None,
            },
        ];

        if network_identifiers {
            patterns.push(PiiPattern {
                category: "ip_address",
                severity: Severity::Low,
                regex: Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b")?,
                validate: None,
            });
        }

        Ok(Self { patterns })
    }

    /// All PII spans in `text`, unmerged
    pub fn find(&self, text: &str) -> Vec<Redaction> {
        let mut found = Vec::new();
        for pattern in &self.patterns {
            for m in pattern.regex.find_iter(text) {
                if pattern.validate.map_or(true, |check| check(m.as_str())) {
                    found.push(Redaction {
                        start: m.start(),
                        end: m.end(),
                        category: pattern.category,
                        severity: pattern.severity,
                    });
                }
            }
        }
        found
    }
}

impl GuardrailStage for PiiStage {
    fn name(&self) -> &'static str {
        "pii_detection"
    }

    fn applies_to(&self, _direction: Direction) -> bool {
        true
    }

    fn check(&self, segment: &Segment, _ctx: &FilterContext) -> StageVerdict {
        let found = self.find(&segment.text);
        if found.is_empty() {
            StageVerdict::Pass
        } else {
            StageVerdict::Redact(found)
        }
    }
}

fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}
