//! HTTP client adapter for non-host processes.
//!
//! A drop-in [`VaultLink`]: vault operations go to the host's `POST /rpc`,
//! vault enumeration comes from `GET /health`, the only surface a remote
//! process needs.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::hub::VaultLink;
use crate::protocol::OperationResponse;

pub struct RemoteRpcBridge {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum RpcBridgeError {
    #[error("cannot connect to MCP server at {0}")]
    Unreachable(String),
    #[error("http client construction failed: {0}")]
    Client(#[from] reqwest::Error),
}

impl RemoteRpcBridge {
    pub fn new(base_url: impl Into<String>, auth_token: &str) -> Result<Self, RpcBridgeError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if !auth_token.is_empty() {
            if let Ok(value) =
                reqwest::header::HeaderValue::from_str(&format!("Bearer {auth_token}"))
            {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(RemoteRpcBridge {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn for_port(port: u16, auth_token: &str) -> Result<Self, RpcBridgeError> {
        Self::new(format!("http://127.0.0.1:{port}"), auth_token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Connect-and-verify constructor: probes `/health` once.
    pub async fn connect(port: u16, auth_token: &str) -> Result<Self, RpcBridgeError> {
        let bridge = Self::for_port(port, auth_token)?;
        if bridge.health_info().await.is_none() {
            return Err(RpcBridgeError::Unreachable(bridge.base_url.clone()));
        }
        tracing::info!("connected to remote MCP server at {}", bridge.base_url);
        Ok(bridge)
    }

    async fn health_info(&self) -> Option<Value> {
        let response = match self.client.get(format!("{}/health", self.base_url)).send().await {
            Ok(response) => response,
            Err(err) => {
                if err.is_connect() {
                    tracing::error!("connection refused during health check");
                } else {
                    tracing::error!("health check error: {err}");
                }
                return None;
            }
        };
        match response.status().as_u16() {
            200 => response.json().await.ok(),
            401 => {
                tracing::error!("health check authentication failed");
                None
            }
            status => {
                tracing::error!("health check failed with status {status}");
                None
            }
        }
    }
}

#[async_trait]
impl VaultLink for RemoteRpcBridge {
    async fn request_file_operation(
        &self,
        vault_id: &str,
        operation: &str,
        params: Value,
        timeout: Duration,
    ) -> Option<OperationResponse> {
        let body = json!({
            "operation": operation,
            "vaultId": vault_id,
            "params": params,
            "timeoutMs": timeout.as_millis() as u64,
        });
        tracing::debug!("forwarding {operation} to vault {vault_id} over rpc");

        let response = match self
            .client
            .post(format!("{}/rpc", self.base_url))
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) if err.is_connect() => {
                tracing::error!("connection refused - no MCP server running");
                return Some(OperationResponse::failure(
                    "Connection refused - no MCP server running",
                ));
            }
            Err(err) if err.is_timeout() => {
                return Some(OperationResponse::failure(format!(
                    "HTTP timeout after {}s",
                    timeout.as_secs_f64()
                )));
            }
            Err(err) => {
                return Some(OperationResponse::failure(err.to_string()));
            }
        };

        match response.status().as_u16() {
            401 => {
                tracing::error!("rpc authentication failed - token mismatch");
                Some(OperationResponse::failure("Authentication failed - token mismatch"))
            }
            404 => {
                tracing::warn!("no connected vault found: {vault_id}");
                None
            }
            504 => Some(OperationResponse::timeout(timeout.as_secs_f64(), None)),
            200 => {
                let result: Value = response.json().await.unwrap_or_else(|_| json!({}));
                Some(OperationResponse {
                    success: result.get("success").and_then(Value::as_bool).unwrap_or(false),
                    payload: result.get("result").cloned(),
                    error: result
                        .get("error")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    timestamp: result.get("timestamp").cloned(),
                    request_id: None,
                })
            }
            status => {
                tracing::error!("rpc failed with status {status}");
                Some(OperationResponse::failure(format!("RPC failed with status {status}")))
            }
        }
    }

    async fn connected_vaults(&self) -> Vec<String> {
        self.health_info()
            .await
            .and_then(|health| {
                health.get("connectedVaults").and_then(Value::as_array).map(|vaults| {
                    vaults.iter().filter_map(Value::as_str).map(str::to_string).collect()
                })
            })
            .unwrap_or_default()
    }

    async fn active_vault(&self) -> Option<String> {
        self.health_info()
            .await?
            .get("activeVault")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    async fn all_vault_info(&self) -> Map<String, Value> {
        // /health carries no per-vault detail; synthesize the minimal shape.
        let vaults = self.connected_vaults().await;
        let active = self.active_vault().await;
        vaults
            .into_iter()
            .map(|vault_id| {
                let info = json!({
                    "vaultId": vault_id,
                    "isActive": active.as_deref() == Some(vault_id.as_str()),
                });
                (vault_id, info)
            })
            .collect()
    }
}
