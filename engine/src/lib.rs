//! Docent Engine Library
//!
//! Document-grounded assistant core: turn orchestration, retrieval synthesis,
//! external actions, bounded conversational memory, guardrails and reasoning
//! traces. It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Database persistence module
pub mod db;

/// Message bus for turn lifecycle events
pub mod message_bus;

/// Turn orchestration
pub mod orchestrator;

/// Retrieval synthesis over a knowledge retriever
pub mod retrieval;

/// Action registry and executor
pub mod actions;

/// Bounded memory store with eviction and pinning
pub mod memory;

/// Input and output guardrail pipeline
pub mod guardrail;

/// Reasoning trace builder
pub mod trace;

/// Shared text helpers
pub mod text;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
