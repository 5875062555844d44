//! Action executor
//!
//! Validates parameters before any external call, invokes the endpoint under a
//! timeout, and retries transport failures and timeouts with exponential
//! backoff. Rejections and unknown actions are never retried.

use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::{ActionErrorKind, ActionInvocation, ActionRegistry};
use crate::config::ActionsConfig;
use sdk::types::EndpointError;

/// Timeout and retry settings for external calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ActionsConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        }
    }

    /// Delay before retry number `retry` (1-based): base, 2x base, 4x base, ...
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff_base.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ActionsConfig::default())
    }
}

pub struct ActionExecutor {
    registry: Arc<ActionRegistry>,
    policy: RetryPolicy,
}

impl ActionExecutor {
    pub fn new(registry: Arc<ActionRegistry>, policy: RetryPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Run `name` with `parameters`; failures are returned as data
    #[instrument(skip(self, parameters), fields(action = %name))]
    pub async fn execute(&self, name: &str, parameters: Value) -> ActionInvocation {
        let started = Instant::now();

        let Some(spec) = self.registry.get(name) else {
            warn!("Unknown action '{}'", name);
            return ActionInvocation::failed(
                name,
                parameters,
                ActionErrorKind::ActionNotFound,
                format!("no action named '{}' is registered", name),
                0,
                elapsed_ms(started),
            );
        };

        if let Err(e) = spec.schema.validate(&parameters) {
            warn!("Action '{}' rejected before invocation: {}", name, e);
            return ActionInvocation::failed(
                name,
                parameters,
                ActionErrorKind::ActionValidationFailed,
                e.to_string(),
                0,
                elapsed_ms(started),
            );
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = tokio::time::timeout(self.policy.timeout, spec.endpoint.invoke(&parameters)).await;

            let error = match outcome {
                Ok(Ok(result)) => {
                    info!("Action '{}' succeeded after {} attempt(s)", name, attempts);
                    return ActionInvocation {
                        action: name.to_string(),
                        parameters,
                        result: Some(result),
                        success: true,
                        error_kind: None,
                        error_message: None,
                        attempts,
                        duration_ms: elapsed_ms(started),
                    };
                }
                Ok(Err(e)) => e,
                Err(_) => EndpointError::Transport(format!(
                    "timed out after {} ms",
                    self.policy.timeout.as_millis()
                )),
            };

            let retries_used = attempts - 1;
            if !error.is_retryable() || retries_used >= self.policy.max_retries {
                warn!("Action '{}' failed after {} attempt(s): {}", name, attempts, error);
                return ActionInvocation::failed(
                    name,
                    parameters,
                    ActionErrorKind::ActionExecutionFailed,
                    error.to_string(),
                    attempts,
                    elapsed_ms(started),
                );
            }

            let delay = self.policy.backoff(retries_used + 1);
            debug!(
                "Action '{}' attempt {} failed ({}), retrying in {:?}",
                name, attempts, error, delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
