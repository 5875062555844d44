//! HTTP action endpoint
//!
//! Posts the validated parameters as a JSON body. Status codes map onto the
//! retry contract: 4xx is a rejection, 5xx and connection problems are
//! transport failures.

use async_trait::async_trait;
use reqwest::Client;
use sdk::collaborator::ActionEndpoint;
use sdk::types::EndpointError;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct HttpActionEndpoint {
    client: Client,
    url: String,
}

impl HttpActionEndpoint {
    pub fn new(client: Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ActionEndpoint for HttpActionEndpoint {
    async fn invoke(&self, parameters: &Value) -> Result<Value, EndpointError> {
        tracing::debug!("POST {}", self.url);

        let response = self
            .client
            .post(&self.url)
            .json(parameters)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EndpointError::Transport(format!("request to {} timed out", self.url))
                } else if e.is_connect() {
                    EndpointError::Transport(format!("cannot connect to {}", self.url))
                } else {
                    EndpointError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_client_error() {
            return Err(EndpointError::Rejected(format!("{}: {}", status, body.trim())));
        }
        if !status.is_success() {
            return Err(EndpointError::Transport(format!("{}: {}", status, body.trim())));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        match serde_json::from_str::<Value>(&body) {
            Ok(value) => Ok(value),
            Err(_) => Ok(Value::String(body)),
        }
    }
}
