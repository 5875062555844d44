//! Local corpus retriever
//!
//! A keyword-overlap `KnowledgeRetriever` over a JSON file of documents and
//! their pages. It lets the CLI run real turns without a vector index; the
//! score is the share of query content words a page contains.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::collaborator::KnowledgeRetriever;
use sdk::types::{RawPassage, RetrieverError, SensitivityLabel};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::text::content_words;

/// One uploaded document as stored in the corpus file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusDocument {
    pub document_id: String,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sensitivity: SensitivityLabel,
    /// Page texts; page numbers start at 1
    pub pages: Vec<String>,
}

struct IndexedPage {
    document: usize,
    page_number: u32,
    terms: HashSet<String>,
}

pub struct CorpusRetriever {
    documents: Vec<CorpusDocument>,
    pages: Vec<IndexedPage>,
}

impl CorpusRetriever {
    pub fn from_documents(documents: Vec<CorpusDocument>) -> Self {
        let mut pages = Vec::new();
        for (di, doc) in documents.iter().enumerate() {
            for (pi, text) in doc.pages.iter().enumerate() {
                pages.push(IndexedPage {
                    document: di,
                    page_number: pi as u32 + 1,
                    terms: content_words(text).into_iter().collect(),
                });
            }
        }
        Self { documents, pages }
    }

    /// Load a corpus file: a JSON array of documents
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read corpus {}", path.display()))?;
        let documents: Vec<CorpusDocument> =
            serde_json::from_str(&raw).context("Failed to parse corpus file")?;
        Ok(Self::from_documents(documents))
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }
}

#[async_trait]
impl KnowledgeRetriever for CorpusRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RawPassage>, RetrieverError> {
        let terms: HashSet<String> = content_words(query).into_iter().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, &IndexedPage)> = self
            .pages
            .iter()
            .filter_map(|page| {
                let hits = terms.intersection(&page.terms).count();
                (hits > 0).then(|| (hits as f32 / terms.len() as f32, page))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.document.cmp(&b.1.document))
                .then_with(|| a.1.page_number.cmp(&b.1.page_number))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, page)| {
                let doc = &self.documents[page.document];
                let text = &doc.pages[(page.page_number - 1) as usize];
                let mut passage =
                    RawPassage::new(text.clone(), doc.document_id.clone(), page.page_number, score)
                        .labelled(doc.sensitivity);
                passage.uploaded_at = doc.uploaded_at;
                passage
            })
            .collect())
    }
}
