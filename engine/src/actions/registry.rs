//! Action registry
//!
//! Maps action names to their endpoint and schema. Built once at startup and
//! shared read-only afterwards.

use sdk::collaborator::ActionEndpoint;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use super::{ActionSchema, ActionSpec, HttpActionEndpoint, ParamBinding};
use crate::config::ActionEndpointConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("action '{0}' is already registered")]
    Duplicate(String),

    #[error("invalid action name '{0}'")]
    InvalidName(String),

    #[error("action '{action}' parameter '{param}': {reason}")]
    InvalidBinding {
        action: String,
        param: String,
        reason: String,
    },
}

#[derive(Debug, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, Arc<ActionSpec>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint under `name` with default triggers
    pub fn register(
        &mut self,
        name: &str,
        endpoint: Arc<dyn ActionEndpoint>,
        schema: ActionSchema,
    ) -> Result<(), RegistryError> {
        self.register_spec(ActionSpec::new(name, endpoint, schema))
    }

    pub fn register_spec(&mut self, spec: ActionSpec) -> Result<(), RegistryError> {
        let valid = !spec.name.is_empty()
            && spec
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(RegistryError::InvalidName(spec.name));
        }
        if self.actions.contains_key(&spec.name) {
            return Err(RegistryError::Duplicate(spec.name));
        }

        info!("Registered action '{}' ({} params)", spec.name, spec.schema.params().len());
        self.actions.insert(spec.name.clone(), Arc::new(spec));
        Ok(())
    }

    /// Build a registry of HTTP endpoints from config
    pub fn from_config(
        endpoints: &[ActionEndpointConfig],
        client: reqwest::Client,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();

        for endpoint in endpoints {
            let mut schema = ActionSchema::new();
            for param in &endpoint.params {
                let binding = match &param.bind {
                    Some(raw) => ParamBinding::parse(raw).map_err(|reason| {
                        RegistryError::InvalidBinding {
                            action: endpoint.name.clone(),
                            param: param.name.clone(),
                            reason,
                        }
                    })?,
                    None => ParamBinding::Extract,
                };
                schema = schema.param(&param.name, param.kind, param.required, binding);
            }

            let http = HttpActionEndpoint::new(client.clone(), &endpoint.url);
            let spec = ActionSpec::new(&endpoint.name, Arc::new(http), schema)
                .with_description(&endpoint.description)
                .with_triggers(&endpoint.triggers);
            registry.register_spec(spec)?;
        }

        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ActionSpec>> {
        self.actions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.actions.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Actions whose triggers appear in `words`, in name order
    pub fn triggered_by(&self, words: &[String]) -> Vec<Arc<ActionSpec>> {
        self.actions
            .values()
            .filter(|spec| spec.triggered_by(words))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ParamType;
    use crate::config::ActionParamConfig;
    use async_trait::async_trait;
    use sdk::types::EndpointError;
    use serde_json::Value;

    struct Echo;

    #[async_trait]
    impl ActionEndpoint for Echo {
        async fn invoke(&self, parameters: &Value) -> Result<Value, EndpointError> {
            Ok(parameters.clone())
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ActionRegistry::new();
        registry
            .register(
                "send_email",
                Arc::new(Echo),
                ActionSchema::new().required("to", ParamType::String),
            )
            .unwrap();

        assert!(registry.get("send_email").is_some());
        assert!(registry.get("send_fax").is_none());
        assert_eq!(registry.names(), vec!["send_email"]);
    }

    #[test]
    fn test_duplicate_and_invalid_names() {
        let mut registry = ActionRegistry::new();
        registry
            .register("ping", Arc::new(Echo), ActionSchema::new())
            .unwrap();

        assert_eq!(
            registry.register("ping", Arc::new(Echo), ActionSchema::new()),
            Err(RegistryError::Duplicate("ping".to_string()))
        );
        assert!(matches!(
            registry.register("bad name", Arc::new(Echo), ActionSchema::new()),
            Err(RegistryError::InvalidName(_))
        ));
    }

    #[test]
    fn test_trigger_routing() {
        let mut registry = ActionRegistry::new();
        registry
            .register("send_email", Arc::new(Echo), ActionSchema::new())
            .unwrap();
        registry
            .register_spec(
                ActionSpec::new("open_ticket", Arc::new(Echo), ActionSchema::new())
                    .with_triggers(["ticket", "incident"]),
            )
            .unwrap();

        let words = crate::text::words("Email me the summary and log an incident");
        let hit: Vec<String> = registry
            .triggered_by(&words)
            .iter()
            .map(|s| s.name.clone())
            .collect();
        assert_eq!(hit, vec!["open_ticket", "send_email"]);
    }

    #[test]
    fn test_from_config_parses_bindings() {
        let endpoints = vec![ActionEndpointConfig {
            name: "send_email".to_string(),
            url: "http://localhost:9/email".to_string(),
            description: "Send an email".to_string(),
            triggers: vec![],
            params: vec![
                ActionParamConfig {
                    name: "to".to_string(),
                    kind: ParamType::String,
                    required: true,
                    bind: Some("profile:email".to_string()),
                },
                ActionParamConfig {
                    name: "body".to_string(),
                    kind: ParamType::String,
                    required: true,
                    bind: Some("context".to_string()),
                },
            ],
        }];

        let registry = ActionRegistry::from_config(&endpoints, reqwest::Client::new()).unwrap();
        let spec = registry.get("send_email").unwrap();
        assert!(spec.schema.needs_context());
        assert_eq!(spec.triggers, vec!["email"]);
    }
}
