//! Actions
//!
//! Named external operations with a minimal typed parameter schema. The
//! registry holds what can be called; the executor validates, invokes with a
//! timeout, retries transport failures with exponential backoff, and always
//! returns an `ActionInvocation` record instead of an error.

pub mod executor;
pub mod http;
pub mod registry;

use sdk::collaborator::ActionEndpoint;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub use executor::{ActionExecutor, RetryPolicy};
pub use http::HttpActionEndpoint;
pub use registry::{ActionRegistry, RegistryError};

/// JSON type a parameter must have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    /// Convert extracted text into this type, if it can be read as one
    pub fn coerce(&self, raw: &str) -> Option<Value> {
        let raw = raw.trim();
        match self {
            ParamType::String => Some(Value::String(raw.to_string())),
            ParamType::Integer => raw.parse::<i64>().ok().map(Value::from),
            ParamType::Number => raw.parse::<f64>().ok().map(Value::from),
            ParamType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(Value::Bool(true)),
                "false" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            ParamType::Array | ParamType::Object => serde_json::from_str(raw)
                .ok()
                .filter(|v: &Value| self.matches(v)),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Where an action candidate's parameter value comes from
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ParamBinding {
    /// `name=value` or `name: value` in the sub-query text
    #[default]
    Extract,
    /// The whole sub-query
    Query,
    /// Text synthesized from retrieved passages; the action then waits for retrieval
    Context,
    /// The caller's user id
    Caller,
    /// A stored profile preference
    Profile(String),
    Literal(Value),
}

impl ParamBinding {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        match raw {
            "extract" => return Ok(Self::Extract),
            "query" => return Ok(Self::Query),
            "context" => return Ok(Self::Context),
            "caller" => return Ok(Self::Caller),
            _ => {}
        }
        if let Some(key) = raw.strip_prefix("profile:") {
            if key.trim().is_empty() {
                return Err("profile binding needs a preference key".to_string());
            }
            return Ok(Self::Profile(key.trim().to_string()));
        }
        if let Some(literal) = raw.strip_prefix("literal:") {
            return serde_json::from_str(literal)
                .map(Self::Literal)
                .map_err(|e| format!("literal binding is not valid JSON: {}", e));
        }
        Err(format!("unknown binding '{}'", raw))
    }
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamType,
    pub required: bool,
    pub binding: ParamBinding,
}

/// Validation failure naming the offending field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parameter '{}': {}", self.field, self.reason)
    }
}

/// Ordered parameter declarations; validation reports the first failure in this order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionSchema {
    params: Vec<ParamSpec>,
}

impl ActionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(self, name: &str, kind: ParamType) -> Self {
        self.param(name, kind, true, ParamBinding::Extract)
    }

    pub fn optional(self, name: &str, kind: ParamType) -> Self {
        self.param(name, kind, false, ParamBinding::Extract)
    }

    pub fn param(mut self, name: &str, kind: ParamType, required: bool, binding: ParamBinding) -> Self {
        self.params.retain(|p| p.name != name);
        self.params.push(ParamSpec {
            name: name.to_string(),
            kind,
            required,
            binding,
        });
        self
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// True when some parameter is bound to retrieved context
    pub fn needs_context(&self) -> bool {
        self.params.iter().any(|p| p.binding == ParamBinding::Context)
    }

    /// Check presence and types; pure and side-effect free
    pub fn validate(&self, parameters: &Value) -> Result<(), ValidationError> {
        let Some(map) = parameters.as_object() else {
            return Err(ValidationError {
                field: "<parameters>".to_string(),
                reason: format!("expected object, got {}", json_type_name(parameters)),
            });
        };

        for spec in &self.params {
            match map.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(ValidationError {
                        field: spec.name.clone(),
                        reason: "missing required parameter".to_string(),
                    });
                }
                None | Some(Value::Null) => {}
                Some(value) if !spec.kind.matches(value) => {
                    return Err(ValidationError {
                        field: spec.name.clone(),
                        reason: format!(
                            "expected {}, got {}",
                            spec.kind.as_str(),
                            json_type_name(value)
                        ),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// A registered action
#[derive(Clone)]
pub struct ActionSpec {
    pub name: String,
    pub description: String,
    pub endpoint: Arc<dyn ActionEndpoint>,
    pub schema: ActionSchema,
    /// Lowercase words that route a sub-query to this action
    pub triggers: Vec<String>,
}

impl fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSpec")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("triggers", &self.triggers)
            .finish()
    }
}

impl ActionSpec {
    pub fn new(name: &str, endpoint: Arc<dyn ActionEndpoint>, schema: ActionSchema) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            endpoint,
            schema,
            triggers: default_triggers(name),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_triggers<I, S>(mut self, triggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let triggers: Vec<String> = triggers
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if !triggers.is_empty() {
            self.triggers = triggers;
        }
        self
    }

    /// Whether any trigger word (or its plural) appears among `words`
    pub fn triggered_by(&self, words: &[String]) -> bool {
        self.triggers.iter().any(|t| {
            words
                .iter()
                .any(|w| w == t || w.strip_suffix('s') == Some(t.as_str()))
        })
    }
}

/// `send_email` is triggered by "email"; single-word names by themselves
fn default_triggers(name: &str) -> Vec<String> {
    let lower = name.to_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();
    match tokens.last() {
        Some(last) if last.len() >= 3 => vec![last.to_string()],
        _ => vec![lower.clone()],
    }
}

/// Failure classes recorded on an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionErrorKind {
    ActionNotFound,
    ActionValidationFailed,
    ActionExecutionFailed,
}

impl fmt::Display for ActionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionErrorKind::ActionNotFound => "ActionNotFound",
            ActionErrorKind::ActionValidationFailed => "ActionValidationFailed",
            ActionErrorKind::ActionExecutionFailed => "ActionExecutionFailed",
        })
    }
}

/// Record of one `execute` call, successful or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInvocation {
    pub action: String,
    pub parameters: Value,
    pub result: Option<Value>,
    pub success: bool,
    pub error_kind: Option<ActionErrorKind>,
    pub error_message: Option<String>,
    /// Calls made to the endpoint (0 when rejected before invocation)
    pub attempts: u32,
    pub duration_ms: u64,
}

impl ActionInvocation {
    pub(crate) fn failed(
        action: &str,
        parameters: Value,
        kind: ActionErrorKind,
        message: impl Into<String>,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            action: action.to_string(),
            parameters,
            result: None,
            success: false,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            attempts,
            duration_ms,
        }
    }
}
