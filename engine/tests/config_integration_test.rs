//! Integration tests for configuration management
//!
//! These tests verify that a full configuration file is parsed, validated
//! and turned into working collaborators.

use docent_engine::actions::ActionRegistry;
use docent_engine::config::Config;
use sdk::types::SensitivityLabel;
use tempfile::TempDir;

fn full_config(data_dir: &std::path::Path) -> String {
    format!(
        r#"
[core]
log_level = "debug"
data_dir = "{}"

[memory]
capacity_bytes = 65536
max_entries = 64
recency_weight = 2.0
frequency_weight = 0.25
recency_half_life_secs = 600
max_turns_per_session = 8
backend = "memory"

[retrieval]
top_k = 3
timeout_ms = 1500
min_relevance = 0.35

[actions]
timeout_ms = 2000
max_retries = 1
backoff_base_ms = 50

[[actions.endpoints]]
name = "send_email"
url = "http://localhost:8025/send"
description = "Email a summary to the caller"
triggers = ["email", "mail"]

[[actions.endpoints.params]]
name = "to"
type = "string"
required = true
bind = "caller"

[[actions.endpoints.params]]
name = "body"
type = "string"
required = true
bind = "context"

[[actions.endpoints]]
name = "create_ticket"
url = "http://localhost:8080/tickets"

[[actions.endpoints.params]]
name = "priority"
type = "integer"
required = true

[guardrails]
profile = "strict"
default_clearance = "internal"

[guardrails.clearances]
hr-lead = "restricted"

[sessions]
idle_timeout_secs = 900
"#,
        data_dir.display()
    )
}

#[test]
fn test_full_config_parses() {
    let temp = TempDir::new().unwrap();
    let config = Config::from_toml_str(&full_config(temp.path())).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.memory.max_turns_per_session, 8);
    assert_eq!(config.retrieval.top_k, 3);
    assert_eq!(config.actions.max_retries, 1);
    assert_eq!(config.actions.endpoints.len(), 2);
    assert_eq!(config.actions.endpoints[0].params.len(), 2);
    assert_eq!(config.guardrails.profile, "strict");
    assert_eq!(config.sessions.idle_timeout_secs, 900);

    assert_eq!(config.clearance_for("hr-lead"), SensitivityLabel::Restricted);
    assert_eq!(config.clearance_for("alice"), SensitivityLabel::Internal);
}

#[test]
fn test_endpoints_build_a_registry() {
    let temp = TempDir::new().unwrap();
    let config = Config::from_toml_str(&full_config(temp.path())).unwrap();

    let registry =
        ActionRegistry::from_config(&config.actions.endpoints, reqwest::Client::new()).unwrap();
    assert_eq!(registry.len(), 2);

    let email = registry.get("send_email").unwrap();
    assert!(email.schema.needs_context());
    assert!(email.triggered_by(&["mail".to_string()]));
}

#[test]
fn test_minimal_config_uses_defaults() {
    let temp = TempDir::new().unwrap();
    let toml = format!("[core]\ndata_dir = \"{}\"\n", temp.path().display());
    let config = Config::from_toml_str(&toml).unwrap();

    assert_eq!(config.guardrails.profile, "standard");
    assert_eq!(config.memory.backend, "sqlite");
    assert_eq!(config.clearance_for("anyone"), SensitivityLabel::Public);
    assert!(config.actions.endpoints.is_empty());
}

#[test]
fn test_invalid_values_are_rejected() {
    let temp = TempDir::new().unwrap();
    let base = format!("[core]\ndata_dir = \"{}\"\n", temp.path().display());

    let cases = [
        "[guardrails]\nprofile = \"lenient\"\n",
        "[memory]\nbackend = \"redis\"\n",
        "[memory]\ncapacity_bytes = 0\n",
        "[retrieval]\nmin_relevance = 1.5\n",
        "[[actions.endpoints]]\nname = \"x\"\nurl = \"http://h\"\n[[actions.endpoints.params]]\nname = \"p\"\ntype = \"string\"\nbind = \"telepathy\"\n",
    ];
    for case in cases {
        let toml = format!("{}{}", base, case);
        assert!(Config::from_toml_str(&toml).is_err(), "accepted: {}", case);
    }
}

#[test]
fn test_data_dir_is_created() {
    let temp = TempDir::new().unwrap();
    let data_dir = temp.path().join("nested").join("data");
    let toml = format!("[core]\ndata_dir = \"{}\"\n", data_dir.display());

    Config::from_toml_str(&toml).unwrap();
    assert!(data_dir.exists());
}

#[test]
fn test_load_from_path() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, full_config(temp.path())).unwrap();

    let config = Config::load_from_path(&path).unwrap();
    assert_eq!(config.retrieval.timeout_ms, 1500);
}
