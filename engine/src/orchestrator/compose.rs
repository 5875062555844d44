//! Response composition
//!
//! Turns merged passages, conflicts and action results into response
//! segments. Every passage-derived sentence carries its own `[document, p. N]`
//! marker, and every failure gets a sentence saying what went wrong and what
//! to try instead.

use sdk::errors::{DocentErrorExt, EngineError};
use sdk::types::SensitivityLabel;
use serde_json::Value;
use std::collections::BTreeMap;

use super::decompose::{Decomposition, Preference};
use super::turn::Citation;
use crate::actions::{ActionErrorKind, ActionInvocation};
use crate::guardrail::Segment;
use crate::retrieval::{Conflict, RankedPassage, Synthesis};

/// Passages quoted in one response
const MAX_PASSAGES: usize = 5;

/// Characters kept from a passage
const EXCERPT_CHARS: usize = 280;

/// A response segment and the page it cites, if any
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub segment: Segment,
    pub source: Option<(String, u32)>,
}

impl Part {
    fn structural(text: impl Into<String>) -> Self {
        Self {
            segment: Segment::structural(text),
            source: None,
        }
    }

    fn content(text: impl Into<String>, label: Option<SensitivityLabel>) -> Self {
        Self {
            segment: Segment::content(text, label),
            source: None,
        }
    }
}

/// Everything the response is built from
pub struct Findings<'a> {
    pub decomposition: &'a Decomposition,
    /// `None` when nothing was searched
    pub synthesis: Option<&'a Synthesis>,
    /// Score a passage needs to count as an answer to its query
    pub min_relevance: f32,
    pub conflicts: &'a [Conflict],
    pub invocations: &'a [ActionInvocation],
    /// Suggestions offered when a query found nothing relevant
    pub alternatives: &'a [String],
}

pub fn compose(findings: &Findings<'_>) -> Vec<Part> {
    let mut parts = Vec::new();

    if let Some(synthesis) = findings.synthesis {
        compose_retrieval(&mut parts, synthesis, findings.min_relevance, findings.alternatives);
        compose_conflicts(&mut parts, findings.conflicts, synthesis.ranked.passages());
    }

    for invocation in findings.invocations {
        parts.push(describe_invocation(invocation));
    }

    for pref in &findings.decomposition.preferences {
        parts.push(describe_preference(pref));
    }

    if parts.is_empty() {
        parts.push(Part::structural(
            "I did not find a question or a request to act on. Ask about your documents or name an action.",
        ));
    }
    parts
}

fn compose_retrieval(
    parts: &mut Vec<Part>,
    synthesis: &Synthesis,
    min_relevance: f32,
    alternatives: &[String],
) {
    let quoted = synthesis.quoted(min_relevance, MAX_PASSAGES);
    if !quoted.is_empty() {
        parts.push(Part::structural("Here is what I found in your documents:\n"));
        for passage in &quoted {
            parts.push(Part {
                segment: Segment::content(
                    format!(
                        "- {} [{}, p. {}]\n",
                        excerpt(&passage.content),
                        passage.document_id,
                        passage.page_number
                    ),
                    Some(passage.sensitivity),
                ),
                source: Some((passage.document_id.clone(), passage.page_number)),
            });
        }
    }

    let unanswered: Vec<String> = synthesis
        .unanswered(min_relevance)
        .into_iter()
        .map(|q| format!("\"{}\"", q))
        .collect();
    if !unanswered.is_empty() {
        let mut text = format!(
            "I could not find information about {} in your documents, so I will not guess.",
            unanswered.join(" or ")
        );
        if !alternatives.is_empty() {
            text.push_str(" You could: ");
            text.push_str(&alternatives.join("; "));
            text.push('.');
        }
        text.push('\n');
        parts.push(Part::structural(text));
    }

    for outcome in &synthesis.outcomes {
        if let Err(e) = &outcome.result {
            parts.push(Part::structural(format!(
                "Document search for \"{}\" did not complete. {}.\n",
                outcome.query,
                EngineError::from(e.clone()).user_hint()
            )));
        }
    }
}

fn compose_conflicts(parts: &mut Vec<Part>, conflicts: &[Conflict], passages: &[RankedPassage]) {
    for conflict in conflicts {
        let label = passages
            .iter()
            .filter(|p| {
                p.document_id == conflict.first.document_id
                    || p.document_id == conflict.second.document_id
            })
            .map(|p| p.sensitivity)
            .max();
        parts.push(Part::content(
            format!(
                "Note: the sources disagree on {}. {} (p. {}) says \"{}\" while {} (p. {}) says \"{}\"; I have not picked one.\n",
                conflict.subject,
                conflict.first.document_id,
                conflict.first.page_number,
                conflict.first.claim,
                conflict.second.document_id,
                conflict.second.page_number,
                conflict.second.claim
            ),
            label,
        ));
    }
}

fn describe_invocation(invocation: &ActionInvocation) -> Part {
    if invocation.success {
        let detail = match &invocation.result {
            Some(Value::Null) | None => String::new(),
            Some(Value::String(s)) => format!(": {}", s),
            Some(other) => format!(": {}", other),
        };
        // Endpoint output is external content, so it is filtered like a passage
        return Part::content(format!("Action {} completed{}.\n", invocation.action, detail), None);
    }

    let message = invocation.error_message.as_deref().unwrap_or("unknown error");
    let advice = match invocation.error_kind {
        Some(ActionErrorKind::ActionNotFound) => "That action is not available here.",
        Some(ActionErrorKind::ActionValidationFailed) => {
            "Rephrase the request with the missing detail, for example name=value."
        }
        _ => "It may work if you try again later.",
    };
    Part::structural(format!(
        "Action {} could not be completed ({}). {}\n",
        invocation.action, message, advice
    ))
}

fn describe_preference(pref: &Preference) -> Part {
    Part::structural(format!(
        "Noted: I will remember your {} preference ({}).\n",
        pref.key, pref.value
    ))
}

/// Context text handed to actions bound to retrieved content
///
/// One segment per passage the caller is cleared to see.
pub fn context_segments(passages: &[RankedPassage], clearance: SensitivityLabel) -> Vec<Segment> {
    passages
        .iter()
        .filter(|p| p.sensitivity <= clearance)
        .take(MAX_PASSAGES)
        .map(|p| {
            Segment::content(
                format!(
                    "- {} [{}, p. {}]\n",
                    excerpt(&p.content),
                    p.document_id,
                    p.page_number
                ),
                Some(p.sensitivity),
            )
        })
        .collect()
}

/// Citations for parts whose filtered text was not withheld, grouped per document
pub fn citations(parts: &[Part], filtered: &[String]) -> Vec<Citation> {
    let mut pages: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
    let mut order: Vec<&str> = Vec::new();

    for (part, text) in parts.iter().zip(filtered) {
        let Some((document_id, page)) = &part.source else {
            continue;
        };
        if text.contains("[WITHHELD:") {
            continue;
        }
        if !pages.contains_key(document_id.as_str()) {
            order.push(document_id);
        }
        pages.entry(document_id).or_default().push(*page);
    }

    order
        .into_iter()
        .map(|document_id| {
            let mut cited = pages.remove(document_id).unwrap_or_default();
            cited.sort_unstable();
            cited.dedup();
            Citation {
                document_id: document_id.to_string(),
                pages: cited,
            }
        })
        .collect()
}

fn excerpt(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    match cut.rfind(' ') {
        Some(space) => format!("{}...", &cut[..space]),
        None => format!("{}...", cut),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{merge, QueryOutcome, RankedPassages, RetrievalError};
    use sdk::types::RawPassage;
    use serde_json::json;

    fn synthesis(passages: Vec<RawPassage>) -> Synthesis {
        Synthesis {
            outcomes: vec![QueryOutcome {
                query: "vacation policy".to_string(),
                result: Ok(passages.clone()),
                duration_ms: 3,
            }],
            ranked: merge(vec![passages], 0.2),
        }
    }

    fn texts(parts: &[Part]) -> String {
        parts.iter().map(|p| p.segment.text.as_str()).collect()
    }

    #[test]
    fn test_passages_are_cited_inline() {
        let s = synthesis(vec![
            RawPassage::new("Employees accrue 20 days.", "handbook", 4, 0.9),
            RawPassage::new("Carry-over is capped at 5 days.", "faq", 1, 0.8),
        ]);
        let d = Decomposition::default();
        let parts = compose(&Findings {
            decomposition: &d,
            synthesis: Some(&s),
            min_relevance: 0.2,
            conflicts: &[],
            invocations: &[],
            alternatives: &[],
        });

        let text = texts(&parts);
        assert!(text.contains("Employees accrue 20 days. [handbook, p. 4]"));
        assert!(text.contains("[faq, p. 1]"));

        let filtered: Vec<String> = parts.iter().map(|p| p.segment.text.clone()).collect();
        let cites = citations(&parts, &filtered);
        assert_eq!(cites.len(), 2);
        assert_eq!(cites[0].document_id, "handbook");
    }

    #[test]
    fn test_nothing_found_offers_alternatives() {
        let s = synthesis(vec![]);
        let d = Decomposition::default();
        let alternatives = vec!["rephrase the question".to_string()];
        let parts = compose(&Findings {
            decomposition: &d,
            synthesis: Some(&s),
            min_relevance: 0.2,
            conflicts: &[],
            invocations: &[],
            alternatives: &alternatives,
        });

        let text = texts(&parts);
        assert!(text.contains("could not find information about \"vacation policy\""));
        assert!(text.contains("You could: rephrase the question"));
    }

    #[test]
    fn test_each_empty_query_is_acknowledged() {
        let refunds = vec![RawPassage::new("Refunds are accepted within 30 days.", "refund-policy", 1, 0.9)];
        let s = Synthesis {
            outcomes: vec![
                QueryOutcome {
                    query: "refund window".to_string(),
                    result: Ok(refunds.clone()),
                    duration_ms: 2,
                },
                QueryOutcome {
                    query: "parking policy".to_string(),
                    result: Ok(vec![]),
                    duration_ms: 2,
                },
            ],
            ranked: merge(vec![refunds], 0.2),
        };
        let d = Decomposition::default();
        let alternatives = vec!["upload a document that covers this subject".to_string()];
        let parts = compose(&Findings {
            decomposition: &d,
            synthesis: Some(&s),
            min_relevance: 0.2,
            conflicts: &[],
            invocations: &[],
            alternatives: &alternatives,
        });

        let text = texts(&parts);
        assert!(text.contains("[refund-policy, p. 1]"));
        assert!(text.contains("could not find information about \"parking policy\""));
        assert!(!text.contains("\"refund window\""));
        assert!(text.contains("You could: upload a document"));
    }

    #[test]
    fn test_failed_search_is_acknowledged() {
        let s = Synthesis {
            outcomes: vec![QueryOutcome {
                query: "revenue".to_string(),
                result: Err(RetrievalError::Timeout(5000)),
                duration_ms: 5000,
            }],
            ranked: RankedPassages::NoRelevantPassages,
        };
        let d = Decomposition::default();
        let parts = compose(&Findings {
            decomposition: &d,
            synthesis: Some(&s),
            min_relevance: 0.2,
            conflicts: &[],
            invocations: &[],
            alternatives: &[],
        });

        let text = texts(&parts);
        assert!(text.contains("Document search for \"revenue\" did not complete"));
        assert!(text.contains("Document search took too long. Try a narrower question."));
        assert!(!text.contains("5000"));
        assert!(!text.contains("could not find information"));
    }

    #[test]
    fn test_failed_action_names_the_problem() {
        let failed = ActionInvocation::failed(
            "send_email",
            json!({}),
            ActionErrorKind::ActionValidationFailed,
            "parameter 'to': missing required parameter",
            0,
            1,
        );
        let d = Decomposition::default();
        let parts = compose(&Findings {
            decomposition: &d,
            synthesis: None,
            min_relevance: 0.2,
            conflicts: &[],
            invocations: std::slice::from_ref(&failed),
            alternatives: &[],
        });

        let text = texts(&parts);
        assert!(text.contains("send_email could not be completed"));
        assert!(text.contains("'to'"));
    }

    #[test]
    fn test_withheld_parts_are_not_cited() {
        let s = synthesis(vec![RawPassage::new("Salary bands", "hr", 2, 0.9)
            .labelled(SensitivityLabel::Restricted)]);
        let d = Decomposition::default();
        let parts = compose(&Findings {
            decomposition: &d,
            synthesis: Some(&s),
            min_relevance: 0.2,
            conflicts: &[],
            invocations: &[],
            alternatives: &[],
        });

        let filtered: Vec<String> = parts
            .iter()
            .map(|p| match p.source {
                Some(_) => "[WITHHELD:sensitivity]".to_string(),
                None => p.segment.text.clone(),
            })
            .collect();
        assert!(citations(&parts, &filtered).is_empty());
    }

    #[test]
    fn test_context_respects_clearance() {
        let ranked = merge(
            vec![vec![
                RawPassage::new("Public note", "a", 1, 0.9),
                RawPassage::new("Board minutes", "b", 1, 0.8)
                    .labelled(SensitivityLabel::Confidential),
            ]],
            0.0,
        );
        let segments = context_segments(ranked.passages(), SensitivityLabel::Internal);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].text.contains("Public note"));
    }

    #[test]
    fn test_excerpt_truncates_on_word_boundary() {
        let long = "word ".repeat(100);
        let short = excerpt(&long);
        assert!(short.ends_with("..."));
        assert!(short.len() <= EXCERPT_CHARS + 3);
    }
}
