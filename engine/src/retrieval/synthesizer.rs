//! Retrieval synthesizer
//!
//! Each sub-query is searched concurrently with its own timeout. Failures are
//! reported per query and never abort the others; the merge step is pure so
//! ranking can be tested without a retriever.

use futures::future::join_all;
use sdk::collaborator::KnowledgeRetriever;
use sdk::types::RawPassage;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use super::{RankedPassage, RankedPassages, RetrievalError};
use crate::config::RetrievalConfig;
use crate::text::normalize;

/// What one sub-query's search produced
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub query: String,
    /// Passages returned, or why the search failed
    pub result: Result<Vec<RawPassage>, RetrievalError>,
    pub duration_ms: u64,
}

impl QueryOutcome {
    /// Passages at or above `min_relevance`
    pub fn relevant_count(&self, min_relevance: f32) -> usize {
        match &self.result {
            Ok(passages) => passages
                .iter()
                .filter(|p| p.relevance_score >= min_relevance)
                .count(),
            Err(_) => 0,
        }
    }

    /// Whether this search returned `passage` at or above `min_relevance`
    pub fn returned(&self, passage: &RankedPassage, min_relevance: f32) -> bool {
        let Ok(passages) = &self.result else {
            return false;
        };
        passages.iter().any(|p| {
            p.relevance_score >= min_relevance
                && p.document_id == passage.document_id
                && p.page_number == passage.page_number
                && content_hash(&p.content) == passage.content_hash
        })
    }
}

/// Per-query outcomes plus the merged ranking
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub outcomes: Vec<QueryOutcome>,
    pub ranked: RankedPassages,
}

impl Synthesis {
    /// Queries that searched successfully but found nothing relevant
    pub fn unanswered(&self, min_relevance: f32) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_ok() && o.relevant_count(min_relevance) == 0)
            .map(|o| o.query.as_str())
            .collect()
    }

    /// Passages to quote, in rank order
    ///
    /// Takes the top `limit` passages, widened so that every query that found
    /// something keeps its best passage.
    pub fn quoted(&self, min_relevance: f32, limit: usize) -> Vec<&RankedPassage> {
        let passages = self.ranked.passages();
        let mut keep = vec![false; passages.len()];

        for outcome in &self.outcomes {
            if let Some(i) = passages.iter().position(|p| outcome.returned(p, min_relevance)) {
                keep[i] = true;
            }
        }

        let mut room = limit.saturating_sub(keep.iter().filter(|k| **k).count());
        for slot in keep.iter_mut() {
            if room == 0 {
                break;
            }
            if !*slot {
                *slot = true;
                room -= 1;
            }
        }

        passages
            .iter()
            .zip(keep)
            .filter_map(|(p, kept)| kept.then_some(p))
            .collect()
    }
}

pub struct RetrievalSynthesizer {
    retriever: Arc<dyn KnowledgeRetriever>,
    top_k: usize,
    timeout: Duration,
    min_relevance: f32,
}

impl RetrievalSynthesizer {
    pub fn new(retriever: Arc<dyn KnowledgeRetriever>, config: &RetrievalConfig) -> Self {
        Self {
            retriever,
            top_k: config.top_k,
            timeout: Duration::from_millis(config.timeout_ms),
            min_relevance: config.min_relevance,
        }
    }

    pub fn min_relevance(&self) -> f32 {
        self.min_relevance
    }

    /// Search every sub-query concurrently and merge the results
    #[instrument(skip(self, sub_queries), fields(queries = sub_queries.len()))]
    pub async fn synthesize(&self, sub_queries: &[String]) -> Synthesis {
        let searches = sub_queries.iter().map(|q| self.search_one(q));
        let outcomes = join_all(searches).await;

        let results = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .cloned()
            .collect::<Vec<_>>();
        let ranked = merge(results, self.min_relevance);

        debug!(
            "Retrieval merged {} passages from {} queries",
            ranked.passages().len(),
            outcomes.len()
        );

        Synthesis { outcomes, ranked }
    }

    async fn search_one(&self, query: &str) -> QueryOutcome {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.retriever.search(query, self.top_k)).await {
            Ok(Ok(mut passages)) => {
                // Retrievers are asked for top_k; do not trust them to honour it
                passages.truncate(self.top_k);
                Ok(passages)
            }
            Ok(Err(e)) => {
                warn!("Retrieval failed: {}", e);
                Err(RetrievalError::Unavailable(e.to_string()))
            }
            Err(_) => {
                warn!("Retrieval timed out after {:?}", self.timeout);
                Err(RetrievalError::Timeout(self.timeout.as_millis() as u64))
            }
        };

        QueryOutcome {
            query: query.to_string(),
            result,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Deduplicate, filter and rank passages from several searches
///
/// Duplicates share document id, page and normalized-content hash; the most
/// relevant copy wins. Ranking is by relevance descending, then newer upload,
/// then document id, page and hash, so equal inputs always rank identically.
pub fn merge(results: Vec<Vec<RawPassage>>, min_relevance: f32) -> RankedPassages {
    let mut best: HashMap<(String, u32, String), RankedPassage> = HashMap::new();

    for passage in results.into_iter().flatten() {
        if passage.relevance_score.is_nan() || passage.relevance_score < min_relevance {
            continue;
        }
        let ranked = to_ranked(passage);
        let key = (
            ranked.document_id.clone(),
            ranked.page_number,
            ranked.content_hash.clone(),
        );
        match best.get(&key) {
            Some(existing) if existing.relevance_score >= ranked.relevance_score => {}
            _ => {
                best.insert(key, ranked);
            }
        }
    }

    if best.is_empty() {
        return RankedPassages::NoRelevantPassages;
    }

    let mut passages: Vec<RankedPassage> = best.into_values().collect();
    passages.sort_by(rank_order);
    RankedPassages::Found(passages)
}

fn rank_order(a: &RankedPassage, b: &RankedPassage) -> Ordering {
    b.relevance_score
        .total_cmp(&a.relevance_score)
        .then_with(|| match (a.uploaded_at, b.uploaded_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.document_id.cmp(&b.document_id))
        .then_with(|| a.page_number.cmp(&b.page_number))
        .then_with(|| a.content_hash.cmp(&b.content_hash))
}

fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(normalize(content).as_bytes()))
}

fn to_ranked(passage: RawPassage) -> RankedPassage {
    let content_hash = content_hash(&passage.content);
    RankedPassage {
        content: passage.content,
        document_id: passage.document_id,
        page_number: passage.page_number,
        relevance_score: passage.relevance_score,
        distance: passage.distance,
        uploaded_at: passage.uploaded_at,
        sensitivity: passage.sensitivity,
        content_hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use sdk::types::RetrieverError;

    fn p(doc: &str, page: u32, score: f32, content: &str) -> RawPassage {
        RawPassage::new(content, doc, page, score)
    }

    #[test]
    fn test_duplicates_keep_highest_score() {
        let ranked = merge(
            vec![
                vec![p("d1", 1, 0.5, "Revenue grew.")],
                vec![p("d1", 1, 0.9, "  revenue   GREW. ")],
            ],
            0.0,
        );
        let passages = ranked.passages();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].relevance_score, 0.9);
    }

    #[test]
    fn test_same_text_on_different_pages_is_kept() {
        let ranked = merge(vec![vec![p("d1", 1, 0.5, "x"), p("d1", 2, 0.5, "x")]], 0.0);
        assert_eq!(ranked.passages().len(), 2);
    }

    #[test]
    fn test_ties_break_by_recency_then_document() {
        let old = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let new = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ranked = merge(
            vec![vec![
                p("b", 1, 0.7, "one").uploaded(old),
                p("c", 1, 0.7, "two"),
                p("a", 1, 0.7, "three").uploaded(old),
                p("z", 1, 0.7, "four").uploaded(new),
            ]],
            0.0,
        );
        let order: Vec<&str> = ranked
            .passages()
            .iter()
            .map(|p| p.document_id.as_str())
            .collect();
        assert_eq!(order, vec!["z", "a", "b", "c"]);
    }

    #[test]
    fn test_nothing_relevant_is_explicit() {
        assert_eq!(merge(vec![], 0.2), RankedPassages::NoRelevantPassages);
        assert_eq!(
            merge(vec![vec![p("d", 1, 0.1, "weak")]], 0.2),
            RankedPassages::NoRelevantPassages
        );
    }

    struct Scripted;

    #[async_trait]
    impl KnowledgeRetriever for Scripted {
        async fn search(&self, query: &str, _k: usize) -> Result<Vec<RawPassage>, RetrieverError> {
            match query {
                "down" => Err(RetrieverError::Transport("connection refused".into())),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(vec![])
                }
                _ => Ok(vec![RawPassage::new(format!("about {}", query), "doc", 1, 0.8)]),
            }
        }
    }

    #[tokio::test]
    async fn test_failures_are_reported_per_query() {
        let config = RetrievalConfig {
            timeout_ms: 50,
            ..RetrievalConfig::default()
        };
        let synth = RetrievalSynthesizer::new(Arc::new(Scripted), &config);
        let queries = vec!["pricing".to_string(), "down".to_string(), "slow".to_string()];

        let synthesis = synth.synthesize(&queries).await;

        assert_eq!(synthesis.outcomes.len(), 3);
        assert!(synthesis.outcomes[0].result.is_ok());
        assert!(matches!(
            synthesis.outcomes[1].result,
            Err(RetrievalError::Unavailable(_))
        ));
        assert_eq!(synthesis.outcomes[2].result, Err(RetrievalError::Timeout(50)));
        assert_eq!(synthesis.ranked.passages().len(), 1);
    }

    fn outcome(query: &str, passages: Vec<RawPassage>) -> QueryOutcome {
        QueryOutcome {
            query: query.to_string(),
            result: Ok(passages),
            duration_ms: 1,
        }
    }

    fn synthesis(outcomes: Vec<QueryOutcome>) -> Synthesis {
        let results = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .cloned()
            .collect();
        Synthesis {
            ranked: merge(results, 0.2),
            outcomes,
        }
    }

    #[test]
    fn test_unanswered_lists_each_empty_query() {
        let s = synthesis(vec![
            outcome("refund window", vec![p("refunds", 1, 0.9, "30 days")]),
            outcome("parking policy", vec![p("misc", 3, 0.1, "weak match")]),
            QueryOutcome {
                query: "revenue".to_string(),
                result: Err(RetrievalError::Timeout(50)),
                duration_ms: 50,
            },
        ]);

        // Failed searches are reported separately, not as "nothing found"
        assert_eq!(s.unanswered(0.2), vec!["parking policy"]);
    }

    #[test]
    fn test_quoted_keeps_every_answered_query() {
        let strong: Vec<RawPassage> = (1..=6)
            .map(|page| p("handbook", page, 0.9 - page as f32 * 0.01, &format!("leave rule {}", page)))
            .collect();
        let s = synthesis(vec![
            outcome("leave", strong),
            outcome("parking", vec![p("facilities", 2, 0.4, "Parking is free after 6pm.")]),
        ]);

        let quoted = s.quoted(0.2, 5);
        assert_eq!(quoted.len(), 5);
        assert!(quoted.iter().any(|q| q.document_id == "facilities"));
        // Rank order is preserved
        assert_eq!(quoted.last().unwrap().document_id, "facilities");
        assert_eq!(quoted[0].page_number, 1);
    }

    #[test]
    fn test_quoted_is_plain_top_n_for_one_query() {
        let passages: Vec<RawPassage> = (1..=8)
            .map(|page| p("d", page, 0.9 - page as f32 * 0.01, &format!("rule {}", page)))
            .collect();
        let s = synthesis(vec![outcome("rules", passages)]);

        let pages: Vec<u32> = s.quoted(0.2, 5).iter().map(|q| q.page_number).collect();
        assert_eq!(pages, vec![1, 2, 3, 4, 5]);
    }
}
