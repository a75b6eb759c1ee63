//! HTTP JSON-RPC transport backed by `reqwest`.
//!
//! Features:
//! - Automatic retry with exponential backoff for transient errors
//! - Per-request timeout
//! - Monotonic request ids

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use transferindex_core::error::IndexerError;
use transferindex_core::retry::{RetryConfig, RetryPolicy};

/// JSON-RPC error code some providers use for "limit exceeded".
pub const RATE_LIMIT_CODE: i64 = -32005;

// ─── Wire types ──────────────────────────────────────────────────────────────

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Unwrap the result value or return the node's error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

// ─── Transport errors ────────────────────────────────────────────────────────

/// Errors from a single request attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection refused, timeout, TLS failure, ...
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The node answered with a JSON-RPC error object.
    #[error("{0}")]
    Rpc(JsonRpcError),

    /// The response body was not a JSON-RPC response.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Returns `true` for failures worth retrying: network errors,
    /// HTTP 429 / 5xx, and the JSON-RPC rate-limit code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Rpc(e) => e.code == RATE_LIMIT_CODE,
            Self::Decode(_) => false,
        }
    }
}

impl From<TransportError> for IndexerError {
    fn from(e: TransportError) -> Self {
        IndexerError::Rpc(e.to_string())
    }
}

// ─── HttpTransport ───────────────────────────────────────────────────────────

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP JSON-RPC client with timeout and retry.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// Create a transport for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpTransportConfig) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            retry: RetryPolicy::new(config.retry),
            next_id: AtomicU64::new(1),
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, IndexerError> {
        Self::new(url, HttpTransportConfig::default())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method` with `params` and return the `result` value.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, IndexerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(&req).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            method,
                            error = %e,
                            "retrying request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(attempt, method, error = %e, "max retries exceeded");
                        return Err(e.into());
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<Value, TransportError> {
        let resp = self
            .http
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = resp
            .json::<JsonRpcResponse>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        parsed.into_result().map_err(TransportError::Rpc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let req = JsonRpcRequest::new(7, "eth_blockNumber", vec![]);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"eth_blockNumber\""));
        assert!(json.contains("\"id\":7"));
    }

    #[test]
    fn response_error_wins() {
        let resp: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"limit exceeded"}}"#,
        )
        .unwrap();
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, RATE_LIMIT_CODE);
    }

    #[test]
    fn retryable_classification() {
        assert!(TransportError::Network("reset".into()).is_retryable());
        assert!(TransportError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(TransportError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(!TransportError::Status { status: 400, body: String::new() }.is_retryable());
        assert!(TransportError::Rpc(JsonRpcError {
            code: RATE_LIMIT_CODE,
            message: "slow down".into(),
            data: None,
        })
        .is_retryable());
        assert!(!TransportError::Rpc(JsonRpcError {
            code: -32602,
            message: "invalid params".into(),
            data: None,
        })
        .is_retryable());
        assert!(!TransportError::Decode("eof".into()).is_retryable());
    }

    #[test]
    fn transport_errors_become_rpc_errors() {
        let err: IndexerError = TransportError::Network("refused".into()).into();
        assert!(err.is_transient());
    }
}
