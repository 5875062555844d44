//! Configured HTTP actions driven through the executor
//!
//! Uses a local mock server in place of the real action service.

use docent_engine::actions::{ActionErrorKind, ActionExecutor, ActionRegistry, RetryPolicy};
use docent_engine::config::{ActionEndpointConfig, ActionParamConfig};
use docent_engine::actions::ParamType;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn ticket_endpoint(server: &MockServer) -> ActionEndpointConfig {
    ActionEndpointConfig {
        name: "create_ticket".to_string(),
        url: format!("{}/tickets", server.uri()),
        description: "Open a support ticket".to_string(),
        triggers: vec!["ticket".to_string()],
        params: vec![
            ActionParamConfig {
                name: "priority".to_string(),
                kind: ParamType::Integer,
                required: true,
                bind: None,
            },
            ActionParamConfig {
                name: "title".to_string(),
                kind: ParamType::String,
                required: false,
                bind: None,
            },
        ],
    }
}

fn executor(server: &MockServer) -> ActionExecutor {
    let registry =
        ActionRegistry::from_config(&[ticket_endpoint(server)], reqwest::Client::new()).unwrap();
    ActionExecutor::new(
        Arc::new(registry),
        RetryPolicy {
            timeout: Duration::from_millis(500),
            max_retries: 2,
            backoff_base: Duration::from_millis(5),
        },
    )
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tickets"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tickets"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ticket": 42})))
        .mount(&server)
        .await;

    let invocation = executor(&server)
        .execute("create_ticket", json!({"priority": 2}))
        .await;

    assert!(invocation.success);
    assert_eq!(invocation.attempts, 2);
    assert_eq!(invocation.result, Some(json!({"ticket": 42})));
}

#[tokio::test]
async fn test_rejection_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tickets"))
        .respond_with(ResponseTemplate::new(400).set_body_string("priority out of range"))
        .expect(1)
        .mount(&server)
        .await;

    let invocation = executor(&server)
        .execute("create_ticket", json!({"priority": 9}))
        .await;

    assert!(!invocation.success);
    assert_eq!(invocation.attempts, 1);
    assert_eq!(invocation.error_kind, Some(ActionErrorKind::ActionExecutionFailed));
    assert!(invocation
        .error_message
        .unwrap()
        .contains("priority out of range"));
}

#[tokio::test]
async fn test_invalid_parameters_never_reach_the_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tickets"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let invocation = executor(&server)
        .execute("create_ticket", json!({"priority": "urgent"}))
        .await;

    assert!(!invocation.success);
    assert_eq!(invocation.attempts, 0);
    assert_eq!(invocation.error_kind, Some(ActionErrorKind::ActionValidationFailed));
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tickets"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let invocation = executor(&server)
        .execute("create_ticket", json!({"priority": 1}))
        .await;

    assert!(!invocation.success);
    assert_eq!(invocation.attempts, 3);
    assert!(invocation.error_message.unwrap().contains("timed out"));
}
