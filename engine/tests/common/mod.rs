//! Shared fakes for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use docent_engine::actions::{ActionRegistry, ActionSchema, ParamBinding, ParamType};
use docent_engine::config::Config;
use docent_engine::guardrail::GuardrailPipeline;
use docent_engine::memory::{Clock, InMemoryBackend, ManualClock, MemoryStore};
use docent_engine::orchestrator::{Orchestrator, OrchestratorContext};
use sdk::collaborator::{ActionEndpoint, KnowledgeRetriever, MemoryBackend};
use sdk::types::{EndpointError, RawPassage, RetrieverError};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Returns the same passages for every query and records what it was asked
#[derive(Default)]
pub struct FixedRetriever {
    passages: Vec<RawPassage>,
    queries: Mutex<Vec<String>>,
}

impl FixedRetriever {
    pub fn new(passages: Vec<RawPassage>) -> Self {
        Self {
            passages,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl KnowledgeRetriever for FixedRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RawPassage>, RetrieverError> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.passages.iter().take(k).cloned().collect())
    }
}

/// Answers only queries that mention one of its keywords
pub struct KeywordRetriever {
    entries: Vec<(&'static str, RawPassage)>,
}

impl KeywordRetriever {
    pub fn new(entries: Vec<(&'static str, RawPassage)>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl KnowledgeRetriever for KeywordRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RawPassage>, RetrieverError> {
        let query = query.to_lowercase();
        Ok(self
            .entries
            .iter()
            .filter(|(keyword, _)| query.contains(keyword))
            .map(|(_, passage)| passage.clone())
            .take(k)
            .collect())
    }
}

/// Holds every search until released, signalling when one has started
#[derive(Default)]
pub struct GatedRetriever {
    pub started: Notify,
    pub release: Notify,
}

#[async_trait]
impl KnowledgeRetriever for GatedRetriever {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<RawPassage>, RetrieverError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(upload_passages())
    }
}

/// Records whether a backend key exists at the moment each search runs
pub struct WatchingRetriever {
    backend: Arc<InMemoryBackend>,
    key: String,
    seen: Mutex<Vec<bool>>,
}

impl WatchingRetriever {
    pub fn new(backend: Arc<InMemoryBackend>, key: String) -> Self {
        Self {
            backend,
            key,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<bool> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl KnowledgeRetriever for WatchingRetriever {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<RawPassage>, RetrieverError> {
        let present = self.backend.contains(&self.key).await;
        self.seen.lock().unwrap().push(present);
        Ok(Vec::new())
    }
}

pub struct DownRetriever;

#[async_trait]
impl KnowledgeRetriever for DownRetriever {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<RawPassage>, RetrieverError> {
        Err(RetrieverError::Transport("connection refused".to_string()))
    }
}

/// Accepts every call and keeps the parameters it was given
#[derive(Default)]
pub struct RecordingEndpoint {
    calls: Mutex<Vec<Value>>,
}

impl RecordingEndpoint {
    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionEndpoint for RecordingEndpoint {
    async fn invoke(&self, parameters: &Value) -> Result<Value, EndpointError> {
        self.calls.lock().unwrap().push(parameters.clone());
        Ok(json!({ "status": "sent" }))
    }
}

pub struct BrokenEndpoint;

#[async_trait]
impl ActionEndpoint for BrokenEndpoint {
    async fn invoke(&self, _parameters: &Value) -> Result<Value, EndpointError> {
        Err(EndpointError::Transport("mail relay returned 503".to_string()))
    }
}

/// Three passages from two documents
pub fn upload_passages() -> Vec<RawPassage> {
    vec![
        RawPassage::new(
            "The onboarding guide explains how new staff request laptop access.",
            "onboarding-guide",
            2,
            0.91,
        ),
        RawPassage::new(
            "Expense reports are submitted through the finance portal each month.",
            "finance-handbook",
            4,
            0.84,
        ),
        RawPassage::new(
            "Managers approve expense reports before the finance team reviews them.",
            "finance-handbook",
            5,
            0.77,
        ),
    ]
}

/// `send_email` addressed to the caller with the retrieved context as body
pub fn email_registry(endpoint: Arc<dyn ActionEndpoint>) -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry
        .register(
            "send_email",
            endpoint,
            ActionSchema::new()
                .param("to", ParamType::String, true, ParamBinding::Caller)
                .param("body", ParamType::String, true, ParamBinding::Context),
        )
        .unwrap();
    registry
}

pub fn test_config() -> Config {
    let mut config = Config::default_config();
    config.memory.backend = "memory".to_string();
    config.actions.timeout_ms = 500;
    config.actions.backoff_base_ms = 1;
    config
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub backend: Arc<InMemoryBackend>,
    pub clock: Arc<ManualClock>,
}

pub fn harness(retriever: Arc<dyn KnowledgeRetriever>, registry: ActionRegistry) -> Harness {
    harness_with(retriever, registry, test_config())
}

pub fn harness_with(
    retriever: Arc<dyn KnowledgeRetriever>,
    registry: ActionRegistry,
    config: Config,
) -> Harness {
    harness_on(retriever, registry, config, Arc::new(InMemoryBackend::new()))
}

/// Harness over an existing backend, e.g. one seeded by an earlier store
pub fn harness_on(
    retriever: Arc<dyn KnowledgeRetriever>,
    registry: ActionRegistry,
    config: Config,
    backend: Arc<InMemoryBackend>,
) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let memory = Arc::new(MemoryStore::with_clock(
        Arc::clone(&backend) as Arc<dyn MemoryBackend>,
        &config.memory,
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));
    let guardrails = GuardrailPipeline::from_profile_name(&config.guardrails.profile).unwrap();

    let ctx = OrchestratorContext::new(retriever, Arc::new(registry), memory, guardrails)
        .with_clock(Arc::clone(&clock) as Arc<dyn Clock>);

    Harness {
        orchestrator: Orchestrator::new(ctx, &config),
        backend,
        clock,
    }
}
