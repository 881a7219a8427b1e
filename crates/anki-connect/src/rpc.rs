//! JSON-RPC client for AnkiConnect.
//!
//! Every call is an HTTP POST of `{action, version, params, key?}`. The
//! response must be exactly `{result, error}`; a non-null `error` wins over
//! whatever `result` holds. Each attempt has its own timeout, and failed
//! attempts are retried according to the client's [`RetryPolicy`].

use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ConnectionSettings;
use crate::error::{Result, RpcError, RpcErrorKind};
use crate::retry::RetryPolicy;

/// AnkiConnect API version this client speaks.
pub const API_VERSION: u32 = 6;

#[derive(Serialize)]
struct Request<'a> {
    action: &'a str,
    version: u32,
    params: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
}

/// HTTP client for the AnkiConnect API
#[derive(Debug, Clone)]
pub struct RpcClient {
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    policy: RetryPolicy,
    http: Client,
}

impl RpcClient {
    pub fn new(settings: &ConnectionSettings) -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| RpcError::network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            timeout: settings.timeout(),
            policy: settings.retry_policy(),
            http,
        })
    }

    /// Replace the retry policy derived from the connection settings.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Call `action` and return its raw `result`.
    pub async fn invoke(&self, action: &str, params: Value) -> Result<Value> {
        let params = match params {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let body = Request {
            action,
            version: API_VERSION,
            params: &params,
            key: self.api_key.as_deref(),
        };

        let mut attempt = 1;
        loop {
            debug!("AnkiConnect {} (attempt {})", action, attempt);
            let outcome = match tokio::time::timeout(self.timeout, self.send(&body)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(RpcError::timeout(format!(
                    "no response within {}ms",
                    self.timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(e) if self.policy.should_retry(attempt, &e) => {
                    let delay = self.policy.backoff.delay(attempt);
                    warn!(
                        "AnkiConnect {} failed ({}), retrying in {:?}",
                        action, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!("AnkiConnect {} failed: {}", action, e);
                    return Err(e);
                }
            }
        }
    }

    /// Call `action` and deserialize its `result`.
    pub async fn invoke_as<T: DeserializeOwned>(&self, action: &str, params: Value) -> Result<T> {
        let result = self.invoke(action, params).await?;
        serde_json::from_value(result)
            .map_err(|e| RpcError::protocol(format!("unexpected result for {}: {}", action, e)))
    }

    async fn send(&self, body: &Request<'_>) -> Result<Value> {
        let response = self.http.post(&self.endpoint).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RpcError::new(RpcErrorKind::Http(status.as_u16()), text));
        }

        let bytes = response.bytes().await?;
        let envelope: Value = serde_json::from_slice(&bytes)?;
        unwrap_envelope(envelope)
    }
}

/// Validate the `{result, error}` envelope and extract the result.
fn unwrap_envelope(envelope: Value) -> Result<Value> {
    let Value::Object(mut fields) = envelope else {
        return Err(RpcError::protocol("response is not a JSON object"));
    };
    if fields.len() != 2 || !fields.contains_key("result") || !fields.contains_key("error") {
        let keys: Vec<&String> = fields.keys().collect();
        return Err(RpcError::protocol(format!(
            "response must contain exactly result and error, got {:?}",
            keys
        )));
    }

    match fields.remove("error") {
        Some(Value::Null) | None => Ok(fields.remove("result").unwrap_or(Value::Null)),
        Some(Value::String(message)) => Err(RpcError::remote(message)),
        Some(other) => Err(RpcError::remote(other.to_string())),
    }
}
