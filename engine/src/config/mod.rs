//! Configuration management
//!
//! This module handles loading, validation, and management of the Docent configuration.
//! Configuration is stored in TOML format at ~/.docent/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **memory**: Capacity budget, eviction weights, backend selection
//! - **retrieval**: Result count, timeout, relevance floor, local corpus
//! - **actions**: Timeout, retry policy, registered HTTP endpoints
//! - **guardrails**: Policy profile and caller clearances
//! - **sessions**: Idle expiry
//!
//! # Examples
//!
//! ```no_run
//! use docent_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Guardrail profile: {}", config.guardrails.profile);
//! println!("Memory budget: {} bytes", config.memory.capacity_bytes);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use sdk::types::SensitivityLabel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::actions::ParamType;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// Memory store configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Retrieval configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Action executor configuration
    #[serde(default)]
    pub actions: ActionsConfig,

    /// Guardrail configuration
    #[serde(default)]
    pub guardrails: GuardrailConfig,

    /// Session lifecycle configuration
    #[serde(default)]
    pub sessions: SessionConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Memory store configuration
///
/// The eviction score of an entry is
/// `recency_weight * exp(-ln2 * idle / recency_half_life) + frequency_weight * ln(1 + accesses)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Total resident size budget across all sessions and profiles
    #[serde(default = "default_capacity_bytes")]
    pub capacity_bytes: usize,

    /// Maximum number of resident entries
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,

    #[serde(default = "default_frequency_weight")]
    pub frequency_weight: f64,

    /// Idle time after which the recency term halves
    #[serde(default = "default_recency_half_life")]
    pub recency_half_life_secs: u64,

    /// Turns retained per session before the oldest are dropped
    #[serde(default = "default_max_turns")]
    pub max_turns_per_session: usize,

    /// Persistent backend: "sqlite" or "memory"
    #[serde(default = "default_memory_backend")]
    pub backend: String,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Passages requested per sub-query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_retrieval_timeout")]
    pub timeout_ms: u64,

    /// Passages scoring below this are treated as irrelevant
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,

    /// Local JSON corpus used by the CLI retriever (supports ~ expansion)
    #[serde(default)]
    pub corpus_path: Option<PathBuf>,
}

/// Action executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionsConfig {
    #[serde(default = "default_action_timeout")]
    pub timeout_ms: u64,

    /// Retries after the first attempt for transport failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay; doubles on each further retry
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// HTTP endpoints registered at startup
    #[serde(default)]
    pub endpoints: Vec<ActionEndpointConfig>,
}

/// An HTTP action endpoint declared in config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEndpointConfig {
    pub name: String,
    pub url: String,

    #[serde(default)]
    pub description: String,

    /// Words that route a sub-query to this action; derived from the name when empty
    #[serde(default)]
    pub triggers: Vec<String>,

    #[serde(default)]
    pub params: Vec<ActionParamConfig>,
}

/// One parameter of an action schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionParamConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: ParamType,

    #[serde(default)]
    pub required: bool,

    /// Where the value comes from: "extract", "query", "context", "caller",
    /// "profile:<key>" or "literal:<json>"
    #[serde(default)]
    pub bind: Option<String>,
}

/// Guardrail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Policy profile: "strict" or "standard"
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Clearance for callers without an explicit entry
    #[serde(default)]
    pub default_clearance: SensitivityLabel,

    /// Per-user clearance overrides
    #[serde(default)]
    pub clearances: HashMap<String, SensitivityLabel>,
}

impl GuardrailConfig {
    pub fn clearance_for(&self, user_id: &str) -> SensitivityLabel {
        self.clearances
            .get(user_id)
            .copied()
            .unwrap_or(self.default_clearance)
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions idle for longer than this expire at their next turn
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.docent")
}

fn default_capacity_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_max_entries() -> usize {
    10_000
}

fn default_recency_weight() -> f64 {
    1.0
}

fn default_frequency_weight() -> f64 {
    0.5
}

fn default_recency_half_life() -> u64 {
    3600
}

fn default_max_turns() -> usize {
    50
}

fn default_memory_backend() -> String {
    "sqlite".to_string()
}

fn default_top_k() -> usize {
    5
}

fn default_retrieval_timeout() -> u64 {
    5_000
}

fn default_min_relevance() -> f32 {
    0.2
}

fn default_action_timeout() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base() -> u64 {
    200
}

fn default_profile() -> String {
    "standard".to_string()
}

fn default_idle_timeout() -> u64 {
    24 * 3600
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: default_capacity_bytes(),
            max_entries: default_max_entries(),
            recency_weight: default_recency_weight(),
            frequency_weight: default_frequency_weight(),
            recency_half_life_secs: default_recency_half_life(),
            max_turns_per_session: default_max_turns(),
            backend: default_memory_backend(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            timeout_ms: default_retrieval_timeout(),
            min_relevance: default_min_relevance(),
            corpus_path: None,
        }
    }
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_action_timeout(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base(),
            endpoints: Vec::new(),
        }
    }
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            default_clearance: SensitivityLabel::Public,
            clearances: HashMap::new(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.docent/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.docent/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".docent").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            memory: MemoryConfig::default(),
            retrieval: RetrievalConfig::default(),
            actions: ActionsConfig::default(),
            guardrails: GuardrailConfig::default(),
            sessions: SessionConfig::default(),
        }
    }

    /// Clearance of a caller: explicit entry or the configured default
    pub fn clearance_for(&self, user_id: &str) -> SensitivityLabel {
        self.guardrails.clearance_for(user_id)
    }

    /// Validate and process configuration
    ///
    /// Checks ranges and enumerations, expands `~` in paths and creates the
    /// data directory when missing.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_profiles = ["strict", "standard"];
        if !valid_profiles.contains(&self.guardrails.profile.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid guardrail profile '{}'. Must be one of: {}",
                self.guardrails.profile,
                valid_profiles.join(", ")
            )));
        }

        let valid_backends = ["sqlite", "memory"];
        if !valid_backends.contains(&self.memory.backend.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid memory backend '{}'. Must be one of: {}",
                self.memory.backend,
                valid_backends.join(", ")
            )));
        }

        if self.memory.capacity_bytes == 0 || self.memory.max_entries == 0 {
            return Err(EngineError::Config(
                "memory capacity_bytes and max_entries must be positive".to_string(),
            ));
        }
        if self.memory.recency_weight < 0.0 || self.memory.frequency_weight < 0.0 {
            return Err(EngineError::Config(
                "memory weights must not be negative".to_string(),
            ));
        }
        if self.memory.recency_half_life_secs == 0 {
            return Err(EngineError::Config(
                "recency_half_life_secs must be positive".to_string(),
            ));
        }
        if self.memory.max_turns_per_session == 0 {
            return Err(EngineError::Config(
                "max_turns_per_session must be positive".to_string(),
            ));
        }

        if self.retrieval.top_k == 0 {
            return Err(EngineError::Config("top_k must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_relevance) {
            return Err(EngineError::Config(
                "min_relevance must be between 0.0 and 1.0".to_string(),
            ));
        }

        for endpoint in &self.actions.endpoints {
            if endpoint.name.trim().is_empty() {
                return Err(EngineError::Config(
                    "action endpoint name must not be empty".to_string(),
                ));
            }
            for param in &endpoint.params {
                if let Some(bind) = &param.bind {
                    crate::actions::ParamBinding::parse(bind).map_err(|e| {
                        EngineError::Config(format!(
                            "action '{}' parameter '{}': {}",
                            endpoint.name, param.name, e
                        ))
                    })?;
                }
            }
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        if let Some(corpus) = &self.retrieval.corpus_path {
            self.retrieval.corpus_path = Some(expand_path(corpus)?);
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.guardrails.profile, "standard");
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.actions.max_retries, 2);
        assert_eq!(config.memory.backend, "sqlite");
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_config();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.guardrails.profile, deserialized.guardrails.profile);
        assert_eq!(
            config.memory.capacity_bytes,
            deserialized.memory.capacity_bytes
        );
    }

    #[test]
    fn test_clearance_lookup() {
        let mut config = Config::default_config();
        config
            .guardrails
            .clearances
            .insert("alice".to_string(), SensitivityLabel::Confidential);

        assert_eq!(config.clearance_for("alice"), SensitivityLabel::Confidential);
        assert_eq!(config.clearance_for("bob"), SensitivityLabel::Public);
    }
}
