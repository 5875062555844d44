//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - ask: Process one turn and print the answer with its sources
//! - session new / close: Start or end a session
//! - history: Show the stored turns of a session
//! - config show / path: Inspect configuration

use anyhow::{Context, Result};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::actions::ActionRegistry;
use crate::config::Config;
use crate::db::Database;
use crate::guardrail::GuardrailPipeline;
use crate::memory::{EntryKey, InMemoryBackend, MemoryStore};
use crate::orchestrator::{Orchestrator, OrchestratorContext, Turn};
use crate::retrieval::CorpusRetriever;
use sdk::collaborator::MemoryBackend;
use sdk::errors::{DocentErrorExt, EngineError};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// An orchestrator wired to the configured collaborators
pub struct Assembly {
    pub orchestrator: Orchestrator,
    database: Option<Database>,
}

impl Assembly {
    /// Build every collaborator from configuration
    ///
    /// The memory backend is SQLite under the data directory unless the
    /// config selects the in-process backend.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let (backend, database): (Arc<dyn MemoryBackend>, Option<Database>) =
            if config.memory.backend == "memory" {
                (Arc::new(InMemoryBackend::new()), None)
            } else {
                let db_path = get_db_path(config)?;
                let database = Database::new(&db_path)
                    .await
                    .context("Failed to open database")?;
                (Arc::new(database.memory_backend()), Some(database))
            };
        let memory = Arc::new(MemoryStore::new(backend, &config.memory));

        let retriever = match &config.retrieval.corpus_path {
            Some(path) => CorpusRetriever::load(path).await?,
            None => CorpusRetriever::from_documents(Vec::new()),
        };
        info!("Loaded corpus with {} documents", retriever.document_count());

        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        let actions = ActionRegistry::from_config(&config.actions.endpoints, client)
            .context("Failed to register actions")?;

        let guardrails = GuardrailPipeline::from_profile_name(&config.guardrails.profile)
            .context("Failed to build guardrail pipeline")?;

        let ctx = OrchestratorContext::new(
            Arc::new(retriever),
            Arc::new(actions),
            memory,
            guardrails,
        );

        Ok(Self {
            orchestrator: Orchestrator::new(ctx, config),
            database,
        })
    }

    /// Flush and close the database, if one is open
    pub async fn shutdown(self) -> Result<()> {
        if let Some(database) = self.database {
            database.close().await?;
        }
        Ok(())
    }
}

/// Process one turn
pub async fn handle_ask(
    input: String,
    user: String,
    session: Option<String>,
    show_trace: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let assembly = Assembly::from_config(config).await?;
    let session =
        session.unwrap_or_else(|| assembly.orchestrator.open_session(&user));

    let turn = assembly
        .orchestrator
        .process_turn(&input, &session, &user)
        .await;

    match format {
        OutputFormat::Text => print_turn(&turn, show_trace),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&turn)?),
    }

    assembly.shutdown().await
}

/// Start a new session
pub async fn handle_session_new(user: String, config: &Config, format: OutputFormat) -> Result<()> {
    let assembly = Assembly::from_config(config).await?;
    let session = assembly.orchestrator.open_session(&user);

    match format {
        OutputFormat::Text => println!("{}", session),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "user_id": user, "session_id": session }))?
        ),
    }

    assembly.shutdown().await
}

/// Close a session and drop its stored history
pub async fn handle_session_close(
    user: String,
    session: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let assembly = Assembly::from_config(config).await?;
    assembly.orchestrator.close_session(&user, &session).await;
    assembly
        .orchestrator
        .memory()
        .forget(&EntryKey::session(&user, &session))
        .await
        .map_err(hinted)
        .context("Failed to remove session history")?;

    match format {
        OutputFormat::Text => println!("Closed session {}", session),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "session_id": session, "closed": true }))?
        ),
    }

    assembly.shutdown().await
}

/// Show the stored turns of a session
pub async fn handle_history(
    user: String,
    session: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let assembly = Assembly::from_config(config).await?;
    let history = assembly
        .orchestrator
        .history(&user, &session)
        .await
        .map_err(hinted)
        .context("Failed to load session history")?;

    match format {
        OutputFormat::Text => {
            if history.turns().is_empty() {
                println!("No turns in session {}", session);
            } else {
                println!(
                    "Session {} ({} of {} turns kept):",
                    session,
                    history.turns().len(),
                    history.total_turns()
                );
                println!();
                for turn in history.turns() {
                    println!("[{}] {}", turn.timestamp.format("%Y-%m-%d %H:%M:%S"), turn.outcome);
                    println!("  You: {}", turn.filtered_input);
                    println!("  Answer: {}", first_line(&turn.response));
                    println!();
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "session_id": session,
                "total_turns": history.total_turns(),
                "turns": history.turns(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    assembly.shutdown().await
}

/// Show the effective configuration
pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let rendered =
                toml::to_string_pretty(config).context("Failed to serialize configuration")?;
            println!("{}", rendered);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}

pub fn handle_config_path(path: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", path.display()),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "path": path }))?
        ),
    }
    Ok(())
}

fn print_turn(turn: &Turn, show_trace: bool) {
    println!("{}", turn.response);

    if !turn.citations.is_empty() {
        println!();
        println!("Sources:");
        for citation in &turn.citations {
            println!("  - {}", citation);
        }
    }

    if !turn.actions.is_empty() {
        println!();
        println!("Actions:");
        for action in &turn.actions {
            let status = if action.success { "ok" } else { "failed" };
            println!(
                "  - {} ({}, {} attempts, {}ms)",
                action.action, status, action.attempts, action.duration_ms
            );
        }
    }

    if show_trace {
        println!();
        println!("Trace ({} steps):", turn.trace.len());
        for step in turn.trace.steps() {
            println!(
                "  {:>2}. [{}] {} ({:.2})",
                step.index,
                step.kind.as_str(),
                step.description,
                step.confidence
            );
            if let Some(error) = step.error() {
                println!("      error: {}", error);
            }
        }
    }

    println!();
    println!("Session: {}  Outcome: {}", turn.session_id, turn.outcome);
}

/// Engine error with its user-facing hint as the outermost message
fn hinted(err: impl Into<EngineError>) -> anyhow::Error {
    let err = err.into();
    let hint = err.user_hint().to_string();
    anyhow::Error::new(err).context(hint)
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

/// Get the database path from config
fn get_db_path(config: &Config) -> Result<PathBuf> {
    let data_dir = expand_data_dir(&config.core.data_dir)?;
    Ok(data_dir.join("docent.db"))
}

/// Expand data directory path (handle ~ expansion)
fn expand_data_dir(path: &Path) -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        if let Ok(rest) = path.strip_prefix("~") {
            return Ok(home.join(rest));
        }
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryError;

    #[test]
    fn test_expand_data_dir_leaves_absolute_paths() {
        let path = Path::new("/var/lib/docent");
        assert_eq!(expand_data_dir(path).unwrap(), PathBuf::from("/var/lib/docent"));
    }

    #[test]
    fn test_first_line() {
        assert_eq!(first_line("one\ntwo"), "one");
        assert_eq!(first_line(""), "");
    }

    #[test]
    fn test_hinted_memory_error_keeps_cause() {
        let err = hinted(MemoryError::Unavailable("disk I/O error".to_string()));
        let chain: Vec<String> = err.chain().map(|e| e.to_string()).collect();

        assert_eq!(chain[0], "Conversation memory is unavailable. This answer will not be remembered");
        assert!(chain[1].contains("disk I/O error"));
    }

    #[tokio::test]
    async fn test_assembly_with_in_memory_backend() {
        let mut config = Config::default_config();
        config.memory.backend = "memory".to_string();

        let assembly = Assembly::from_config(&config).await.unwrap();
        let session = assembly.orchestrator.open_session("alice");
        let turn = assembly
            .orchestrator
            .process_turn("what is the refund window?", &session, "alice")
            .await;

        assert_eq!(turn.session_id, session);
        assert!(!turn.response.is_empty());
        assembly.shutdown().await.unwrap();
    }
}
