//! The vault registry and request correlation core.
//!
//! One hub per host process. It owns the client socket set, the vault
//! registry, the active-vault pointer, and the pending-request map; all
//! mutation happens under one lock. WebSocket sessions feed messages in via
//! [`VaultHub::handle_message`] and deliver outbound frames from a per-client
//! channel.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::sync::{Mutex, mpsc, oneshot};
use uuid::Uuid;

use crate::protocol::{OperationResponse, now_timestamp};

/// Uniform vault-operation surface shared by the local hub and the remote
/// RPC bridge so tool code never branches on process role.
#[async_trait]
pub trait VaultLink: Send + Sync {
    /// Forward one operation to a vault and await its correlated response.
    /// `None` means no such vault is connected.
    async fn request_file_operation(
        &self,
        vault_id: &str,
        operation: &str,
        params: Value,
        timeout: Duration,
    ) -> Option<OperationResponse>;

    async fn connected_vaults(&self) -> Vec<String>;

    async fn active_vault(&self) -> Option<String>;

    async fn all_vault_info(&self) -> Map<String, Value>;
}

struct PendingRequest {
    tx: oneshot::Sender<OperationResponse>,
    owner_client: String,
}

#[derive(Default)]
struct HubState {
    /// Outbound frame channel per connected WebSocket client.
    clients: HashMap<String, mpsc::UnboundedSender<Value>>,
    /// Most recent registration payload per client.
    vault_info: HashMap<String, Value>,
    client_to_vault: HashMap<String, String>,
    /// BTreeMap so disconnect promotion is deterministic.
    vault_to_client: BTreeMap<String, String>,
    active_vault: Option<String>,
    pending: HashMap<String, PendingRequest>,
}

/// Host-side vault hub.
pub struct VaultHub {
    state: Mutex<HubState>,
    auth_token: String,
    port: u16,
}

impl VaultHub {
    pub fn new(port: u16, auth_token: impl Into<String>) -> Self {
        VaultHub {
            state: Mutex::new(HubState::default()),
            auth_token: auth_token.into(),
            port,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Empty token disables authentication entirely.
    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    /// Register a new WebSocket client and return its id plus the welcome
    /// message to send.
    pub async fn connect_client(&self) -> (String, mpsc::UnboundedReceiver<Value>, Value) {
        let client_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let welcome = json!({
            "type": "connected",
            "clientId": client_id,
            "timestamp": now_timestamp(),
        });
        let mut state = self.state.lock().await;
        state.clients.insert(client_id.clone(), tx);
        drop(state);
        tracing::info!("new WebSocket client connected: {client_id}");
        (client_id, rx, welcome)
    }

    /// Handle one inbound message from a client. Returns an optional direct
    /// reply to send back on the same socket.
    pub async fn handle_message(&self, client_id: &str, message: Value) -> Option<Value> {
        let msg_type = message.get("type").and_then(Value::as_str).unwrap_or_default();

        if msg_type == "register" {
            return Some(self.register_vault(client_id, &message).await);
        }

        if msg_type == "pong" {
            return None;
        }

        if msg_type.contains("response") {
            if let Some(request_id) = message.get("id").and_then(Value::as_str) {
                self.resolve_pending(request_id, &message).await;
                return None;
            }
        }

        Some(json!({
            "type": "error",
            "error": format!("Unknown message type: {msg_type}"),
        }))
    }

    async fn register_vault(&self, client_id: &str, message: &Value) -> Value {
        let payload = message.get("payload").cloned().unwrap_or_else(|| json!({}));
        let vault_name = payload
            .get("vaultName")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let vault_id = if vault_name.is_empty() {
            format!("vault_{client_id}")
        } else {
            vault_name.to_string()
        };

        let mut state = self.state.lock().await;
        state.vault_info.insert(client_id.to_string(), payload);
        state.client_to_vault.insert(client_id.to_string(), vault_id.clone());
        state.vault_to_client.insert(vault_id.clone(), client_id.to_string());
        if state.active_vault.is_none() {
            state.active_vault = Some(vault_id.clone());
            tracing::info!("set active vault to: {vault_id}");
        }
        let is_active = state.active_vault.as_deref() == Some(vault_id.as_str());
        drop(state);

        tracing::info!("registered vault '{vault_id}' for client {client_id}");
        json!({
            "type": "registered",
            "success": true,
            "vaultId": vault_id,
            "isActive": is_active,
        })
    }

    async fn resolve_pending(&self, request_id: &str, message: &Value) {
        let pending = {
            let mut state = self.state.lock().await;
            state.pending.remove(request_id)
        };
        match pending {
            Some(PendingRequest { tx, .. }) => {
                let response = OperationResponse {
                    success: message.get("success").and_then(Value::as_bool).unwrap_or(false),
                    payload: message.get("payload").cloned(),
                    error: message
                        .get("error")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    timestamp: message.get("timestamp").cloned(),
                    request_id: Some(request_id.to_string()),
                };
                let _ = tx.send(response);
                tracing::debug!("resolved pending request {request_id}");
            }
            None => {
                tracing::warn!("received response for unknown request: {request_id}");
            }
        }
    }

    /// Tear down a client: vault mappings, active-vault promotion, and
    /// cancellation of every pending request it owned.
    pub async fn disconnect_client(&self, client_id: &str) {
        let mut state = self.state.lock().await;
        state.clients.remove(client_id);
        state.vault_info.remove(client_id);

        if let Some(vault_id) = state.client_to_vault.remove(client_id) {
            state.vault_to_client.remove(&vault_id);
            if state.active_vault.as_deref() == Some(vault_id.as_str()) {
                state.active_vault = state.vault_to_client.keys().next().cloned();
                match &state.active_vault {
                    Some(next) => tracing::info!("switched active vault to: {next}"),
                    None => tracing::info!("no active vault - all vaults disconnected"),
                }
            }
        }

        // Dropping the sender resolves each waiter with a cancellation.
        let cancelled: Vec<String> = state
            .pending
            .iter()
            .filter(|(_, p)| p.owner_client == client_id)
            .map(|(id, _)| id.clone())
            .collect();
        for request_id in cancelled {
            state.pending.remove(&request_id);
            tracing::debug!("cancelled pending request {request_id} for disconnected client");
        }
        drop(state);
        tracing::info!("client disconnected: {client_id}");
    }

    /// Snapshot for `GET /health`.
    pub async fn health_snapshot(&self) -> Value {
        let state = self.state.lock().await;
        json!({
            "status": "healthy",
            "clients": state.clients.len(),
            "clientIds": state.clients.keys().collect::<Vec<_>>(),
            "connectedVaults": state.vault_to_client.keys().collect::<Vec<_>>(),
            "activeVault": state.active_vault,
            "timestamp": now_timestamp(),
        })
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    fn vault_info_for(&self, state: &HubState, vault_id: &str) -> Option<Value> {
        let client_id = state.vault_to_client.get(vault_id)?;
        let mut info = state.vault_info.get(client_id)?.clone();
        if let Some(obj) = info.as_object_mut() {
            obj.insert("vaultId".to_string(), json!(vault_id));
            obj.insert("clientId".to_string(), json!(client_id));
            obj.insert(
                "isActive".to_string(),
                json!(state.active_vault.as_deref() == Some(vault_id)),
            );
        }
        Some(info)
    }
}

#[async_trait]
impl VaultLink for VaultHub {
    async fn request_file_operation(
        &self,
        vault_id: &str,
        operation: &str,
        params: Value,
        timeout: Duration,
    ) -> Option<OperationResponse> {
        // Primary lookup, then a legacy scan over registration payloads.
        let (client_id, sender) = {
            let state = self.state.lock().await;
            let client_id = state
                .vault_to_client
                .get(vault_id)
                .cloned()
                .or_else(|| {
                    state
                        .vault_info
                        .iter()
                        .find(|(cid, info)| {
                            info.get("vaultName").and_then(Value::as_str) == Some(vault_id)
                                || cid.as_str() == vault_id
                        })
                        .map(|(cid, _)| cid.clone())
                })?;
            let sender = state.clients.get(&client_id)?.clone();
            (client_id, sender)
        };

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            state.pending.insert(
                request_id.clone(),
                PendingRequest { tx, owner_client: client_id.clone() },
            );
        }

        let request = json!({
            "id": request_id,
            "type": operation,
            "payload": params,
        });
        if sender.send(request).is_err() {
            // Socket writer already gone; treat like a disconnect.
            let mut state = self.state.lock().await;
            state.pending.remove(&request_id);
            return Some(OperationResponse::failure("Client connection closed"));
        }
        tracing::debug!("sent file operation request {request_id} to vault {vault_id}");

        let outcome = tokio::time::timeout(timeout, rx).await;
        // Always clear the pending entry on the way out.
        {
            let mut state = self.state.lock().await;
            state.pending.remove(&request_id);
        }

        match outcome {
            Ok(Ok(response)) => Some(response),
            // Sender dropped: the owning client disconnected mid-flight.
            Ok(Err(_)) => Some(OperationResponse {
                success: false,
                error: Some("Request cancelled - client disconnected".to_string()),
                request_id: Some(request_id),
                ..Default::default()
            }),
            Err(_) => {
                tracing::error!(
                    "timeout waiting for response to request {request_id} from vault {vault_id}"
                );
                Some(OperationResponse::timeout(timeout.as_secs_f64(), Some(request_id)))
            }
        }
    }

    async fn connected_vaults(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.vault_to_client.keys().cloned().collect()
    }

    async fn active_vault(&self) -> Option<String> {
        let state = self.state.lock().await;
        state.active_vault.clone()
    }

    async fn all_vault_info(&self) -> Map<String, Value> {
        let state = self.state.lock().await;
        let mut result = Map::new();
        let vault_ids: Vec<String> = state.vault_to_client.keys().cloned().collect();
        for vault_id in vault_ids {
            if let Some(info) = self.vault_info_for(&state, &vault_id) {
                result.insert(vault_id, info);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn register(hub: &VaultHub, vault_name: &str) -> (String, mpsc::UnboundedReceiver<Value>) {
        let (client_id, rx, _welcome) = hub.connect_client().await;
        let reply = hub
            .handle_message(
                &client_id,
                json!({"type": "register", "payload": {"vaultName": vault_name, "vaultPath": "/v"}}),
            )
            .await
            .unwrap();
        assert_eq!(reply["type"], "registered");
        assert_eq!(reply["success"], true);
        (client_id, rx)
    }

    #[tokio::test]
    async fn first_vault_becomes_active() {
        let hub = VaultHub::new(0, "");
        let (_c1, _rx1) = register(&hub, "A").await;
        let (_c2, _rx2) = register(&hub, "B").await;
        assert_eq!(hub.active_vault().await.as_deref(), Some("A"));
        assert_eq!(hub.connected_vaults().await, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn unnamed_vault_gets_synthesized_id() {
        let hub = VaultHub::new(0, "");
        let (client_id, _rx, _welcome) = hub.connect_client().await;
        let reply = hub
            .handle_message(&client_id, json!({"type": "register", "payload": {}}))
            .await
            .unwrap();
        assert_eq!(reply["vaultId"], format!("vault_{client_id}"));
    }

    #[tokio::test]
    async fn disconnect_promotes_next_vault_deterministically() {
        let hub = VaultHub::new(0, "");
        let (c_a, _rx_a) = register(&hub, "A").await;
        let (_c_b, _rx_b) = register(&hub, "B").await;
        let (_c_c, _rx_c) = register(&hub, "C").await;

        hub.disconnect_client(&c_a).await;
        // BTreeMap order: B before C.
        assert_eq!(hub.active_vault().await.as_deref(), Some("B"));

        let remaining = hub.connected_vaults().await;
        assert_eq!(remaining, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn last_disconnect_clears_active() {
        let hub = VaultHub::new(0, "");
        let (c_a, _rx_a) = register(&hub, "A").await;
        hub.disconnect_client(&c_a).await;
        assert_eq!(hub.active_vault().await, None);
    }

    #[tokio::test]
    async fn request_correlation_resolves_matching_id() {
        let hub = VaultHub::new(0, "");
        let (client_id, mut rx) = register(&hub, "A").await;

        let hub_ref = &hub;
        let pending = tokio::join!(
            hub_ref.request_file_operation(
                "A",
                "file:read",
                json!({"path": "x.md"}),
                Duration::from_secs(2),
            ),
            async {
                let frame = rx.recv().await.unwrap();
                assert_eq!(frame["type"], "file:read");
                let request_id = frame["id"].as_str().unwrap().to_string();
                // There is exactly one pending entry while in flight.
                assert_eq!(hub_ref.pending_count().await, 1);
                hub_ref
                    .handle_message(
                        &client_id,
                        json!({
                            "type": "file:read_response",
                            "id": request_id,
                            "success": true,
                            "payload": {"content": "hello"},
                            "timestamp": 1.0,
                        }),
                    )
                    .await;
            }
        );

        let response = pending.0.unwrap();
        assert!(response.success);
        assert_eq!(response.payload.unwrap()["content"], "hello");
        assert_eq!(hub.pending_count().await, 0, "entry removed exactly once");
    }

    #[tokio::test]
    async fn unknown_vault_returns_none() {
        let hub = VaultHub::new(0, "");
        let response = hub
            .request_file_operation("nope", "file:read", json!({}), Duration::from_millis(100))
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn timeout_returns_structured_envelope() {
        let hub = VaultHub::new(0, "");
        let (_client_id, mut _rx) = register(&hub, "A").await;
        let response = hub
            .request_file_operation("A", "file:read", json!({}), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(!response.success);
        assert!(response.is_timeout());
        assert!(response.request_id.is_some());
        assert_eq!(hub.pending_count().await, 0);
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_requests() {
        let hub = std::sync::Arc::new(VaultHub::new(0, ""));
        let (client_id, mut rx) = register(&hub, "A").await;

        let hub2 = hub.clone();
        let waiter = tokio::spawn(async move {
            hub2.request_file_operation("A", "file:read", json!({}), Duration::from_secs(5))
                .await
        });

        // Wait for the request frame, then drop the client.
        let _frame = rx.recv().await.unwrap();
        hub.disconnect_client(&client_id).await;

        let response = waiter.await.unwrap().unwrap();
        assert!(!response.success);
        assert!(response.error.unwrap().contains("cancelled"));
        assert_eq!(hub.pending_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_message_type_gets_error_reply() {
        let hub = VaultHub::new(0, "");
        let (client_id, _rx, _welcome) = hub.connect_client().await;
        let reply = hub
            .handle_message(&client_id, json!({"type": "mystery"}))
            .await
            .unwrap();
        assert_eq!(reply["type"], "error");
        assert!(reply["error"].as_str().unwrap().contains("mystery"));
    }

    #[tokio::test]
    async fn vault_info_carries_activity_flag() {
        let hub = VaultHub::new(0, "");
        let (_c1, _rx1) = register(&hub, "A").await;
        let (_c2, _rx2) = register(&hub, "B").await;
        let info = hub.all_vault_info().await;
        assert_eq!(info["A"]["isActive"], true);
        assert_eq!(info["B"]["isActive"], false);
        assert_eq!(info["A"]["vaultPath"], "/v");
    }
}
