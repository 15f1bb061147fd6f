//! Wire envelopes shared by the hub, the RPC bridge, and their callers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of one forwarded vault operation, as resolved from the editor's
/// `*_response` message (or synthesized on timeout/cancellation).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OperationResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl OperationResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        OperationResponse {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn timeout(seconds: f64, request_id: Option<String>) -> Self {
        OperationResponse {
            success: false,
            error: Some(format!("Request timeout after {seconds}s")),
            request_id,
            ..Default::default()
        }
    }

    /// Whether this envelope is the synthesized timeout marker.
    pub fn is_timeout(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.starts_with("Request timeout after"))
    }
}

/// Seconds-since-epoch timestamp used across hub payloads.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// RPC request body accepted by `POST /rpc`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(rename = "vaultId", default)]
    pub vault_id: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(rename = "timeoutMs", default)]
    pub timeout_ms: Option<u64>,
}

/// Default per-request timeout for `/rpc`, in seconds.
pub const RPC_DEFAULT_TIMEOUT_SECS: f64 = 20.0;
/// Hard upper bound for `/rpc` timeouts, in seconds.
pub const RPC_MAX_TIMEOUT_SECS: f64 = 30.0;
/// Payload cap for `/rpc` bodies.
pub const RPC_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;
