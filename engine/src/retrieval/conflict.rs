//! Conflict detection between ranked passages
//!
//! Two kinds of disagreement are recognised across different documents:
//! numeric claims about the same subject and unit with different values, and
//! the same "X is Y" statement asserted by one source and negated by another.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::RankedPassage;
use crate::text::{content_words, is_stopword, words};

/// Where a conflicting claim came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSource {
    pub document_id: String,
    pub page_number: u32,
    /// The claimed value as written, e.g. `4.2 million` or `not refundable`
    pub claim: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub subject: String,
    pub first: ClaimSource,
    pub second: ClaimSource,
}

struct Claim {
    key: String,
    /// Canonical value compared across sources
    value: String,
    source: ClaimSource,
}

static SENTENCE_BREAK: OnceLock<Option<Regex>> = OnceLock::new();
static NUMBER: OnceLock<Option<Regex>> = OnceLock::new();
static COPULA: OnceLock<Option<Regex>> = OnceLock::new();

fn sentence_break() -> Option<&'static Regex> {
    SENTENCE_BREAK
        .get_or_init(|| Regex::new(r"[.!?]+(?:\s+|$)|[;\n]+").ok())
        .as_ref()
}

fn number() -> Option<&'static Regex> {
    NUMBER
        .get_or_init(|| {
            Regex::new(r"(?i)(\$)?(\d[\d,]*(?:\.\d+)?)\s*(%|percent\b|million\b|billion\b|thousand\b|days?\b|hours?\b|users?\b|employees?\b)?").ok()
        })
        .as_ref()
}

fn copula() -> Option<&'static Regex> {
    COPULA
        .get_or_init(|| Regex::new(r"(?i)\b(is|are|was|were)\s+(not\s+)?").ok())
        .as_ref()
}

/// Find material disagreements among `passages`, in rank order of discovery
pub fn detect_conflicts(passages: &[RankedPassage]) -> Vec<Conflict> {
    let mut claims: Vec<Claim> = Vec::new();
    for passage in passages {
        for sentence in split_sentences(&passage.content) {
            claims.extend(numeric_claims(sentence, passage));
            claims.extend(polarity_claim(sentence, passage));
        }
    }

    // First claim seen per key, then the first later claim that disagrees
    let mut first_by_key: BTreeMap<&str, &Claim> = BTreeMap::new();
    let mut reported: Vec<&str> = Vec::new();
    let mut conflicts = Vec::new();

    for claim in &claims {
        match first_by_key.get(claim.key.as_str()) {
            None => {
                first_by_key.insert(&claim.key, claim);
            }
            Some(first) => {
                if first.source.document_id != claim.source.document_id
                    && first.value != claim.value
                    && !reported.contains(&claim.key.as_str())
                {
                    reported.push(&claim.key);
                    conflicts.push(Conflict {
                        subject: subject_of(&claim.key),
                        first: first.source.clone(),
                        second: claim.source.clone(),
                    });
                }
            }
        }
    }

    conflicts
}

fn split_sentences(text: &str) -> Vec<&str> {
    match sentence_break() {
        Some(re) => re
            .split(text)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect(),
        None => vec![text],
    }
}

fn numeric_claims(sentence: &str, passage: &RankedPassage) -> Vec<Claim> {
    let Some(re) = number() else {
        return Vec::new();
    };

    let mut claims = Vec::new();
    let mut cursor = 0;
    for caps in re.captures_iter(sentence) {
        let Some(whole) = caps.get(0) else { continue };
        let lead = &sentence[cursor..whole.start()];
        cursor = whole.end();

        let Some(raw) = caps.get(2).map(|m| m.as_str()) else {
            continue;
        };
        let currency = caps.get(1).is_some();
        let unit = caps
            .get(3)
            .map(|m| unit_name(m.as_str()))
            .unwrap_or_default();

        // Bare years label the claim rather than make one
        if !currency && unit.is_empty() && is_year(raw) {
            continue;
        }

        let subject = trailing_subject(lead);
        if subject.is_empty() {
            continue;
        }
        let Ok(value) = raw.replace(',', "").parse::<f64>() else {
            continue;
        };

        let unit_key = match (currency, unit.as_str()) {
            (true, "") => "usd".to_string(),
            (true, u) => format!("usd {}", u),
            (false, u) => u.to_string(),
        };

        claims.push(Claim {
            key: format!("num|{}|{}", subject, unit_key),
            value: format!("{}", value),
            source: ClaimSource {
                document_id: passage.document_id.clone(),
                page_number: passage.page_number,
                claim: whole.as_str().trim().to_string(),
            },
        });
    }
    claims
}

fn polarity_claim(sentence: &str, passage: &RankedPassage) -> Option<Claim> {
    let caps = copula()?.captures(sentence)?;
    let whole = caps.get(0)?;

    let subject = trailing_subject(&sentence[..whole.start()]);
    let predicate = content_words(&sentence[whole.end()..]).into_iter().next()?;
    // Numeric predicates are handled as numeric claims
    if subject.is_empty() || predicate.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let negated = caps.get(2).is_some();
    Some(Claim {
        key: format!("pol|{}|{}", subject, predicate),
        value: if negated { "negative" } else { "positive" }.to_string(),
        source: ClaimSource {
            document_id: passage.document_id.clone(),
            page_number: passage.page_number,
            claim: if negated {
                format!("not {}", predicate)
            } else {
                predicate
            },
        },
    })
}

/// Last three content words before a claim
fn trailing_subject(lead: &str) -> String {
    let ws: Vec<String> = words(lead)
        .into_iter()
        .filter(|w| !is_stopword(w) && !is_claim_verb(w) && !w.chars().all(|c| c.is_ascii_digit()))
        .collect();
    let start = ws.len().saturating_sub(3);
    ws[start..].join(" ")
}

fn is_claim_verb(word: &str) -> bool {
    matches!(
        word,
        "reached" | "totaled" | "totalled" | "total" | "totals" | "grew" | "fell" | "rose"
            | "increased" | "decreased" | "stood" | "came" | "amounted" | "approximately"
            | "about" | "around" | "roughly" | "nearly" | "over" | "under"
    )
}

fn unit_name(raw: &str) -> String {
    let lower = raw.to_lowercase();
    match lower.as_str() {
        "%" | "percent" => "%".to_string(),
        other => other.trim_end_matches('s').to_string(),
    }
}

fn is_year(raw: &str) -> bool {
    raw.len() == 4
        && raw.chars().all(|c| c.is_ascii_digit())
        && (raw.starts_with("19") || raw.starts_with("20"))
}

fn subject_of(key: &str) -> String {
    key.split('|').nth(1).unwrap_or_default().to_string()
}
