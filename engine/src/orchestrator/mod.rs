//! Orchestrator
//!
//! Runs one user turn end to end:
//!
//! 1. Filter the input (a block ends the turn here)
//! 2. Load session history and the user profile, pinning the session entry
//! 3. Decompose the input into sub-queries and route each one
//! 4. Search and run context-free actions concurrently, then run actions
//!    that need the retrieved context
//! 5. Compose a cited response and filter it for the caller's clearance
//! 6. Write the turn, preferences and topics back to memory
//!
//! Failures of individual searches, actions or memory calls never fail the
//! turn. Each one is recorded on the trace and acknowledged in the response.

pub mod compose;
pub mod decompose;
pub mod session;
pub mod turn;

use futures::future::join_all;
use sdk::collaborator::KnowledgeRetriever;
use sdk::types::SensitivityLabel;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

use crate::actions::{ActionExecutor, ActionInvocation, ActionRegistry, ActionSpec, RetryPolicy};
use crate::config::{Config, GuardrailConfig};
use crate::guardrail::{GuardrailPipeline, Incident, Segment};
use crate::memory::{Clock, EntryKey, MemoryError, MemoryStore, SessionContext, SystemClock, UserProfile};
use crate::message_bus::{Event, MessageBus};
use crate::retrieval::{detect_conflicts, Conflict, RankedPassages, RetrievalSynthesizer, Synthesis};
use crate::trace::StepKind;
use sdk::errors::{DocentErrorExt, EngineError};

use compose::{citations, compose, context_segments, Findings};
use decompose::BindingSources;

pub use decompose::{decompose, detect_preferences, Decomposition, Preference, Route, SubQuery};
pub use session::{Closure, SessionLease, SessionRegistry};
pub use turn::{Citation, ErrorKind, Turn, TurnOutcome};

const BLOCKED_RESPONSE: &str =
    "I can't help with that request because it conflicts with the content policy.";

const WITHHELD_RESPONSE: &str = "I found material for this request, but all of it is restricted for your account, so I can't show it.";

const EXPIRED_RESPONSE: &str = "This session has expired. Start a new session to continue.";

/// Collaborators an orchestrator is built from
///
/// Everything the orchestrator touches is passed in here; there is no global
/// client or session state.
pub struct OrchestratorContext {
    pub retriever: Arc<dyn KnowledgeRetriever>,
    pub actions: Arc<ActionRegistry>,
    pub memory: Arc<MemoryStore>,
    pub guardrails: GuardrailPipeline,
    pub bus: Arc<MessageBus>,
    /// Drives session idle expiry
    pub clock: Arc<dyn Clock>,
}

impl OrchestratorContext {
    pub fn new(
        retriever: Arc<dyn KnowledgeRetriever>,
        actions: Arc<ActionRegistry>,
        memory: Arc<MemoryStore>,
        guardrails: GuardrailPipeline,
    ) -> Self {
        Self {
            retriever,
            actions,
            memory,
            guardrails,
            bus: Arc::new(MessageBus::new()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

pub struct Orchestrator {
    guardrails: GuardrailPipeline,
    clearances: GuardrailConfig,
    synthesizer: RetrievalSynthesizer,
    executor: ActionExecutor,
    memory: Arc<MemoryStore>,
    sessions: SessionRegistry,
    bus: Arc<MessageBus>,
}

/// An action to run for one sub-query
struct PlannedAction {
    spec: Option<Arc<ActionSpec>>,
    name: String,
    sub_query: String,
}

impl Orchestrator {
    pub fn new(ctx: OrchestratorContext, config: &Config) -> Self {
        Self {
            guardrails: ctx.guardrails,
            clearances: config.guardrails.clone(),
            synthesizer: RetrievalSynthesizer::new(ctx.retriever, &config.retrieval),
            executor: ActionExecutor::new(ctx.actions, RetryPolicy::from_config(&config.actions)),
            memory: ctx.memory,
            sessions: SessionRegistry::new(
                Duration::from_secs(config.sessions.idle_timeout_secs),
                ctx.clock,
            ),
            bus: ctx.bus,
        }
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn actions(&self) -> &ActionRegistry {
        self.executor.registry()
    }

    /// Start a session under a fresh id that is not derived from the user id
    pub fn open_session(&self, user_id: &str) -> String {
        self.sessions.open(user_id)
    }

    /// Close a session; a turn still running in it returns `SessionExpired`
    pub async fn close_session(&self, user_id: &str, session_id: &str) -> bool {
        let closed = self.sessions.close(user_id, session_id);
        if closed {
            info!("Closed session {} for user {}", session_id, user_id);
            self.bus
                .publish(Event::SessionClosed {
                    session_id: session_id.to_string(),
                    user_id: user_id.to_string(),
                    reason: Closure::Closed.as_str().to_string(),
                })
                .await;
        }
        closed
    }

    /// Stored history of a session
    pub async fn history(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<SessionContext, MemoryError> {
        self.memory.get_session(user_id, session_id).await
    }

    /// Process one user turn
    ///
    /// Always returns a Turn. Only a blocked input or an expired session end
    /// the turn early; every other failure is recorded on the trace.
    #[instrument(skip(self, input), fields(session = %session_id, user = %user_id))]
    pub async fn process_turn(&self, input: &str, session_id: &str, user_id: &str) -> Turn {
        let started = Instant::now();
        let mut turn = Turn::begin(user_id, session_id, input);

        self.bus
            .publish(Event::TurnStarted {
                turn_id: turn.turn_id.clone(),
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
            })
            .await;
        info!("Turn {} started", turn.turn_id);

        let lease = match self.sessions.acquire(user_id, session_id).await {
            Ok(lease) => lease,
            Err(closure) => {
                expire(&mut turn, closure);
                if closure == Closure::IdleExpired {
                    self.bus
                        .publish(Event::SessionClosed {
                            session_id: session_id.to_string(),
                            user_id: user_id.to_string(),
                            reason: closure.as_str().to_string(),
                        })
                        .await;
                }
                return self.finish(turn, started).await;
            }
        };
        // Stamp after the session lock so history stays in order
        turn.timestamp = chrono::Utc::now();

        let filtered = self.guardrails.filter_input(input);
        turn.filtered_input = filtered.text;
        for incident in &filtered.incidents {
            turn.trace.decide(
                format!("Input redacted by {} before any lookup", incident.stage),
                incident_outputs(incident, None),
            );
        }
        turn.incidents.extend(filtered.incidents);

        if let Some(block) = filtered.blocked {
            turn.trace.decide(
                format!("Input blocked by {}; nothing was searched or executed", block.stage),
                incident_outputs(&block, Some(ErrorKind::InputBlocked)),
            );
            turn.record_error(ErrorKind::InputBlocked);
            turn.incidents.push(block);
            turn.outcome = TurnOutcome::PolicyViolation;
            turn.response = BLOCKED_RESPONSE.to_string();
            return self.finish(turn, started).await;
        }

        let _pin = self
            .memory
            .pin(EntryKey::session(user_id, session_id))
            .await;
        let (history, mut profile) = self.load_memory(&mut turn).await;

        let decomposition = decompose(&turn.filtered_input, self.actions());
        turn.trace.push(
            StepKind::Decision,
            format!(
                "Split the request into {} sub-queries",
                decomposition.sub_queries.len()
            ),
            json!({
                "input": turn.filtered_input,
                "history_turns": history.turns().len(),
            }),
            json!({
                "sub_queries": decomposition.sub_queries,
                "preferences": decomposition.preferences,
            }),
            1.0,
        );
        for pref in &decomposition.preferences {
            profile.set_preference(&pref.key, &pref.value);
        }

        let clearance = self.clearances.clearance_for(user_id);
        let (synthesis, invocations) = self
            .fan_out(&mut turn, &decomposition, &profile, clearance)
            .await;

        let conflicts = synthesis
            .as_ref()
            .map(|s| detect_conflicts(s.ranked.passages()))
            .unwrap_or_default();
        let alternatives = self.record_retrieval(&mut turn, synthesis.as_ref(), &conflicts, &profile);
        record_actions(&mut turn, &invocations);

        let parts = compose(&Findings {
            decomposition: &decomposition,
            synthesis: synthesis.as_ref(),
            min_relevance: self.synthesizer.min_relevance(),
            conflicts: &conflicts,
            invocations: &invocations,
            alternatives: &alternatives,
        });
        let segments: Vec<Segment> = parts.iter().map(|p| p.segment.clone()).collect();
        let output = self.guardrails.filter_output(&segments, clearance);

        for incident in &output.incidents {
            let verb = if incident.is_block() { "withheld" } else { "redacted" };
            turn.trace.decide(
                format!("Part of the response {} by {}", verb, incident.stage),
                incident_outputs(incident, Some(ErrorKind::OutputRedacted)),
            );
        }
        if !output.incidents.is_empty() {
            turn.record_error(ErrorKind::OutputRedacted);
        }

        turn.citations = citations(&parts, &output.segments);
        turn.actions = invocations;
        if output.fully_redacted {
            turn.outcome = TurnOutcome::PolicyViolation;
            turn.response = WITHHELD_RESPONSE.to_string();
            turn.citations.clear();
            turn.trace.decide(
                "Redaction would remove the entire answer; returning a policy response",
                json!({"outcome": TurnOutcome::PolicyViolation}),
            );
        } else {
            turn.response = output.text();
        }
        turn.incidents.extend(output.incidents);

        turn.trace.push(
            StepKind::Synthesis,
            "Composed the response",
            json!({
                "passages": synthesis.as_ref().map(|s| s.ranked.passages().len()).unwrap_or(0),
                "actions": turn.actions.len(),
                "conflicts": conflicts.len(),
            }),
            json!({
                "citations": turn.citations,
                "outcome": turn.outcome,
            }),
            synthesis_confidence(synthesis.as_ref(), &turn.actions),
        );

        if lease.is_closed() {
            warn!("Session {} closed during turn {}; discarding results", session_id, turn.turn_id);
            turn.citations.clear();
            turn.actions.clear();
            expire(&mut turn, Closure::Closed);
            return self.finish(turn, started).await;
        }

        self.write_back(&mut turn, &decomposition).await;
        self.finish(turn, started).await
    }

    /// Session and profile for the turn, or empty turn-scoped copies if memory is down
    async fn load_memory(&self, turn: &mut Turn) -> (SessionContext, UserProfile) {
        let loaded = async {
            let history = self
                .memory
                .get_session(&turn.user_id, &turn.session_id)
                .await?;
            let profile = self.memory.get_profile(&turn.user_id).await?;
            Ok::<_, MemoryError>((history, profile))
        }
        .await;

        match loaded {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Memory unavailable for turn {}: {}", turn.turn_id, e);
                degrade(turn, "load", &e);
                (
                    SessionContext::new(&turn.user_id, &turn.session_id, 1),
                    UserProfile::new(&turn.user_id),
                )
            }
        }
    }

    /// Retrieval and context-free actions together, then context-bound actions
    async fn fan_out(
        &self,
        turn: &mut Turn,
        decomposition: &Decomposition,
        profile: &UserProfile,
        clearance: SensitivityLabel,
    ) -> (Option<Synthesis>, Vec<ActionInvocation>) {
        let (dependent, independent): (Vec<PlannedAction>, Vec<PlannedAction>) = self
            .plan_actions(decomposition)
            .into_iter()
            .partition(|a| a.spec.as_ref().is_some_and(|s| s.schema.needs_context()));

        let search_texts = decomposition.search_texts();
        let retrieval = async {
            if search_texts.is_empty() {
                None
            } else {
                Some(self.synthesizer.synthesize(&search_texts).await)
            }
        };

        let sources = BindingSources {
            caller: &turn.user_id,
            profile,
            context: None,
        };
        let early = join_all(independent.iter().map(|a| self.run_action(a, &sources)));
        let (synthesis, mut invocations) = tokio::join!(retrieval, early);

        if !dependent.is_empty() {
            let context = synthesis
                .as_ref()
                .and_then(|s| self.action_context(turn, &s.ranked, clearance));
            let sources = BindingSources {
                caller: &turn.user_id,
                profile,
                context: context.as_deref(),
            };
            let late = join_all(dependent.iter().map(|a| self.run_action(a, &sources))).await;
            invocations.extend(late);
        }

        (synthesis, invocations)
    }

    fn plan_actions(&self, decomposition: &Decomposition) -> Vec<PlannedAction> {
        decomposition
            .sub_queries
            .iter()
            .flat_map(|q| {
                q.actions.iter().map(move |name| PlannedAction {
                    spec: self.actions().get(name),
                    name: name.clone(),
                    sub_query: q.text.clone(),
                })
            })
            .collect()
    }

    async fn run_action(&self, action: &PlannedAction, sources: &BindingSources<'_>) -> ActionInvocation {
        let parameters = match &action.spec {
            Some(spec) => decompose::bind_parameters(spec, &action.sub_query, sources),
            None => Value::Object(Default::default()),
        };
        self.executor.execute(&action.name, parameters).await
    }

    /// Filtered passage text for actions bound to retrieved context
    fn action_context(
        &self,
        turn: &mut Turn,
        ranked: &RankedPassages,
        clearance: SensitivityLabel,
    ) -> Option<String> {
        let segments = context_segments(ranked.passages(), clearance);
        if segments.is_empty() {
            return None;
        }

        let filtered = self.guardrails.filter_output(&segments, clearance);
        for incident in &filtered.incidents {
            turn.trace.decide(
                format!("Action context redacted by {}", incident.stage),
                incident_outputs(incident, None),
            );
        }
        turn.incidents.extend(filtered.incidents.iter().cloned());
        if filtered.fully_redacted {
            return None;
        }

        Some(format!(
            "Summary of {} passages from your documents:\n{}",
            segments.len(),
            filtered.text()
        ))
    }

    /// Search, no-result and conflict steps; returns the alternatives offered
    fn record_retrieval(
        &self,
        turn: &mut Turn,
        synthesis: Option<&Synthesis>,
        conflicts: &[Conflict],
        profile: &UserProfile,
    ) -> Vec<String> {
        let Some(synthesis) = synthesis else {
            return Vec::new();
        };
        let min_relevance = self.synthesizer.min_relevance();

        for outcome in &synthesis.outcomes {
            let description = format!("Searched documents for \"{}\"", outcome.query);
            let inputs = json!({"query": outcome.query});
            match &outcome.result {
                Ok(passages) => {
                    let top = passages
                        .iter()
                        .map(|p| p.relevance_score)
                        .fold(0.0f32, f32::max);
                    turn.trace.push(
                        StepKind::Search,
                        description,
                        inputs,
                        json!({
                            "returned": passages.len(),
                            "relevant": outcome.relevant_count(min_relevance),
                            "duration_ms": outcome.duration_ms,
                        }),
                        top,
                    );
                }
                Err(e) => {
                    turn.trace.push(
                        StepKind::Search,
                        description,
                        inputs,
                        json!({
                            "error": e.to_string(),
                            "kind": ErrorKind::RetrievalUnavailable,
                            "hint": EngineError::from(e.clone()).user_hint(),
                            "duration_ms": outcome.duration_ms,
                        }),
                        0.0,
                    );
                    turn.record_error(ErrorKind::RetrievalUnavailable);
                }
            }
        }

        let unanswered = synthesis.unanswered(min_relevance);
        let alternatives = if unanswered.is_empty() {
            Vec::new()
        } else {
            suggest_alternatives(profile)
        };
        for query in unanswered {
            turn.trace.decide(
                format!(
                    "No relevant information found for \"{}\"; offering alternatives instead of an answer",
                    query
                ),
                json!({
                    "outcome": "no_information_found",
                    "query": query,
                    "alternatives": alternatives,
                }),
            );
        }

        for conflict in conflicts {
            turn.trace.decide(
                format!(
                    "Sources disagree on {}: {} and {}; presenting both",
                    conflict.subject, conflict.first.document_id, conflict.second.document_id
                ),
                json!({
                    "subject": conflict.subject,
                    "first": conflict.first,
                    "second": conflict.second,
                    "resolution": "present_both",
                }),
            );
        }

        alternatives
    }

    /// Persist preferences, topics and the turn itself
    async fn write_back(&self, turn: &mut Turn, decomposition: &Decomposition) {
        if turn.memory_degraded {
            // Memory was down at load time; the turn stays turn-scoped
            return;
        }

        for pref in &decomposition.preferences {
            if let Err(e) = self
                .memory
                .apply_preference(&turn.user_id, &pref.key, &pref.value)
                .await
            {
                degrade(turn, "preference update", &e);
                return;
            }
        }

        let topics = decomposition.topics();
        if !topics.is_empty() {
            if let Err(e) = self.memory.record_topics(&turn.user_id, &topics).await {
                degrade(turn, "topic update", &e);
                return;
            }
        }

        let stored = turn.for_history();
        if let Err(e) = self
            .memory
            .update_session(&turn.user_id, &turn.session_id, &stored)
            .await
        {
            degrade(turn, "history append", &e);
        }
    }

    async fn finish(&self, turn: Turn, started: Instant) -> Turn {
        for incident in &turn.incidents {
            self.bus
                .publish(Event::IncidentRaised {
                    turn_id: turn.turn_id.clone(),
                    kind: incident.kind,
                    stage: incident.stage.clone(),
                    severity: incident.severity.to_string(),
                })
                .await;
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        self.bus
            .publish(Event::TurnCompleted {
                turn_id: turn.turn_id.clone(),
                session_id: turn.session_id.clone(),
                outcome: turn.outcome,
                duration_ms,
            })
            .await;

        info!(
            "Turn {} finished as {} in {}ms ({} steps, {} actions, {} citations)",
            turn.turn_id,
            turn.outcome,
            duration_ms,
            turn.trace.len(),
            turn.actions.len(),
            turn.citations.len()
        );
        turn
    }
}

fn record_actions(turn: &mut Turn, invocations: &[ActionInvocation]) {
    for inv in invocations {
        let outputs = if inv.success {
            json!({
                "result": inv.result,
                "attempts": inv.attempts,
                "duration_ms": inv.duration_ms,
            })
        } else {
            let kind = inv
                .error_kind
                .map(ErrorKind::from)
                .unwrap_or(ErrorKind::ActionExecutionFailed);
            turn.record_error(kind);
            json!({
                "error": inv.error_message,
                "kind": kind,
                "attempts": inv.attempts,
                "duration_ms": inv.duration_ms,
            })
        };

        turn.trace.push(
            StepKind::Action,
            format!("Invoked {}", inv.action),
            json!({"action": inv.action, "parameters": inv.parameters}),
            outputs,
            if inv.success { 1.0 } else { 0.0 },
        );
    }
}

fn incident_outputs(incident: &Incident, error: Option<ErrorKind>) -> Value {
    let mut outputs = json!({
        "kind": incident.kind,
        "stage": incident.stage,
        "severity": incident.severity,
        "categories": incident.categories,
    });
    if let Some(kind) = error {
        outputs["error"] = json!(format!("{} at stage {}", kind, incident.stage));
        outputs["error_kind"] = json!(kind);
    }
    outputs
}

fn degrade(turn: &mut Turn, during: &str, error: &MemoryError) {
    if !turn.memory_degraded {
        turn.record_error(ErrorKind::MemoryUnavailable);
    }
    turn.memory_degraded = true;
    turn.trace.decide(
        format!("Memory unavailable during {}; continuing with turn-scoped memory", during),
        json!({
            "error": error.to_string(),
            "kind": ErrorKind::MemoryUnavailable,
            "hint": EngineError::from(error.clone()).user_hint(),
        }),
    );
}

fn expire(turn: &mut Turn, closure: Closure) {
    turn.outcome = TurnOutcome::SessionExpired;
    turn.response = EXPIRED_RESPONSE.to_string();
    turn.record_error(ErrorKind::SessionExpired);
    turn.trace.decide(
        "Session is no longer active; in-flight results discarded",
        json!({
            "error": format!("session {}", closure.as_str()),
            "kind": ErrorKind::SessionExpired,
        }),
    );
}

fn suggest_alternatives(profile: &UserProfile) -> Vec<String> {
    let mut alternatives =
        vec!["rephrase the question using terms your documents are likely to contain".to_string()];
    let topics: Vec<&str> = profile.top_topics(3).into_iter().map(|(t, _)| t).collect();
    if !topics.is_empty() {
        alternatives.push(format!(
            "ask about a topic you have explored before ({})",
            topics.join(", ")
        ));
    }
    alternatives.push("upload a document that covers this subject".to_string());
    alternatives
}

fn synthesis_confidence(synthesis: Option<&Synthesis>, invocations: &[ActionInvocation]) -> f32 {
    let retrieval = synthesis.map(|s| {
        s.ranked
            .passages()
            .first()
            .map(|p| p.relevance_score)
            .unwrap_or(0.0)
    });
    let actions = (!invocations.is_empty()).then(|| {
        invocations.iter().filter(|i| i.success).count() as f32 / invocations.len() as f32
    });

    match (retrieval, actions) {
        (Some(r), Some(a)) => (r + a) / 2.0,
        (Some(r), None) => r,
        (None, Some(a)) => a,
        (None, None) => 1.0,
    }
}
