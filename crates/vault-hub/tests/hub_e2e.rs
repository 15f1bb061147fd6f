//! End-to-end hub tests over real sockets: a WebSocket "plugin" client, the
//! HTTP surface, the RPC bridge, and the election sequence.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use vault_hub::{
    OperationResponse, RemoteRpcBridge, Role, VaultHub, VaultLink, elect, start_server,
};

const TOKEN: &str = "test-token";

async fn start_hub(token: &str) -> (Arc<VaultHub>, u16) {
    let hub = Arc::new(VaultHub::new(0, token));
    let (addr, _task) = start_server(hub.clone()).await.unwrap();
    (hub, addr.port())
}

/// Connect a fake editor plugin and register a vault. Returns the socket
/// positioned after the `registered` reply.
async fn register_vault(
    port: u16,
    token: &str,
    vault_name: &str,
) -> tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
> {
    let url = format!("ws://127.0.0.1:{port}/ws?token={token}");
    let (mut socket, _) = connect_async(url).await.unwrap();

    let welcome: Value = next_json(&mut socket).await;
    assert_eq!(welcome["type"], "connected");
    assert!(welcome["clientId"].is_string());

    socket
        .send(Message::Text(
            json!({
                "type": "register",
                "payload": {"vaultName": vault_name, "vaultPath": "/tmp/vault"},
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

    let registered: Value = next_json(&mut socket).await;
    assert_eq!(registered["type"], "registered");
    assert_eq!(registered["success"], true);
    assert_eq!(registered["vaultId"], vault_name);
    socket
}

async fn next_json<S>(socket: &mut S) -> Value
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn register_then_health_reports_vault() {
    let (_hub, port) = start_hub(TOKEN).await;
    let _socket = register_vault(port, TOKEN, "A").await;

    let client = reqwest::Client::new();
    let health: Value = client
        .get(format!("http://127.0.0.1:{port}/health"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(health["status"], "healthy");
    assert_eq!(health["clients"], 1);
    assert_eq!(health["connectedVaults"], json!(["A"]));
    assert_eq!(health["activeVault"], "A");
    assert!(health["timestamp"].is_number());
}

#[tokio::test]
async fn health_is_idempotent_under_concurrent_probes() {
    let (_hub, port) = start_hub(TOKEN).await;
    let _socket = register_vault(port, TOKEN, "A").await;
    let client = reqwest::Client::new();

    let probes = (0..8).map(|_| {
        let client = client.clone();
        async move {
            client
                .get(format!("http://127.0.0.1:{port}/health?token={TOKEN}"))
                .send()
                .await
                .unwrap()
                .status()
                .as_u16()
        }
    });
    for status in futures::future::join_all(probes).await {
        assert_eq!(status, 200);
    }
}

#[tokio::test]
async fn rpc_round_trip_through_websocket() {
    let (_hub, port) = start_hub(TOKEN).await;
    let mut socket = register_vault(port, TOKEN, "A").await;

    // The plugin side: answer the first file operation that arrives.
    let plugin = tokio::spawn(async move {
        let request = next_json(&mut socket).await;
        assert_eq!(request["type"], "file:read");
        assert_eq!(request["payload"]["path"], "notes/today.md");
        socket
            .send(Message::Text(
                json!({
                    "type": "file:read_response",
                    "id": request["id"],
                    "success": true,
                    "payload": {"content": "# Today"},
                    "timestamp": 123.0,
                })
                .to_string()
                .into(),
            ))
            .await
            .unwrap();
        socket
    });

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{port}/rpc"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "operation": "file:read",
            "vaultId": "A",
            "params": {"path": "notes/today.md"},
            "timeoutMs": 5000,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["result"]["content"], "# Today");

    let _socket = plugin.await.unwrap();
}

#[tokio::test]
async fn rpc_unknown_vault_is_404() {
    let (_hub, port) = start_hub(TOKEN).await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{port}/rpc"))
        .bearer_auth(TOKEN)
        .json(&json!({"operation": "file:read", "vaultId": "ghost", "params": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "No connected vault found: ghost");
}

#[tokio::test]
async fn rpc_missing_operation_is_400() {
    let (_hub, port) = start_hub(TOKEN).await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{port}/rpc"))
        .bearer_auth(TOKEN)
        .json(&json!({"vaultId": "A", "params": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn rpc_oversized_body_is_413() {
    let (_hub, port) = start_hub(TOKEN).await;
    let client = reqwest::Client::new();
    let huge = "x".repeat(2 * 1024 * 1024 + 1024);
    let response = client
        .post(format!("http://127.0.0.1:{port}/rpc"))
        .bearer_auth(TOKEN)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(format!(r#"{{"operation": "file:read", "params": {{"blob": "{huge}"}}}}"#))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 413);
}

#[tokio::test]
async fn wrong_token_is_401_on_http() {
    let (_hub, port) = start_hub(TOKEN).await;
    let client = reqwest::Client::new();

    for request in [
        client.get(format!("http://127.0.0.1:{port}/health")),
        client
            .post(format!("http://127.0.0.1:{port}/rpc"))
            .json(&json!({"operation": "x"})),
    ] {
        let response = request.bearer_auth("wrong").send().await.unwrap();
        assert_eq!(response.status().as_u16(), 401);
    }
}

#[tokio::test]
async fn empty_token_disables_auth() {
    let (_hub, port) = start_hub("").await;
    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{port}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn wrong_token_websocket_closes_4001() {
    let (_hub, port) = start_hub(TOKEN).await;
    let url = format!("ws://127.0.0.1:{port}/ws?token=wrong");
    let (mut socket, _) = connect_async(url).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match frame {
        Message::Close(Some(close)) => {
            assert_eq!(u16::from(close.code), 4001);
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn remote_bridge_sees_host_vaults() {
    let (_hub, port) = start_hub(TOKEN).await;
    let _socket = register_vault(port, TOKEN, "A").await;

    let bridge = RemoteRpcBridge::connect(port, TOKEN).await.unwrap();
    assert_eq!(bridge.connected_vaults().await, vec!["A"]);
    assert_eq!(bridge.active_vault().await.as_deref(), Some("A"));
    let info = bridge.all_vault_info().await;
    assert_eq!(info["A"]["isActive"], true);
}

#[tokio::test]
async fn remote_bridge_forwards_operations() {
    let (_hub, port) = start_hub(TOKEN).await;
    let mut socket = register_vault(port, TOKEN, "A").await;

    let plugin = tokio::spawn(async move {
        let request = next_json(&mut socket).await;
        socket
            .send(Message::Text(
                json!({
                    "type": "vault:list_response",
                    "id": request["id"],
                    "success": true,
                    "payload": {"vaults": ["A"]},
                })
                .to_string()
                .into(),
            ))
            .await
            .unwrap();
        socket
    });

    let bridge = RemoteRpcBridge::connect(port, TOKEN).await.unwrap();
    let response: OperationResponse = bridge
        .request_file_operation("A", "vault:list", json!({}), Duration::from_secs(5))
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.payload.unwrap()["vaults"], json!(["A"]));
    let _socket = plugin.await.unwrap();
}

#[tokio::test]
async fn remote_bridge_maps_missing_vault_to_none() {
    let (_hub, port) = start_hub(TOKEN).await;
    let bridge = RemoteRpcBridge::connect(port, TOKEN).await.unwrap();
    let response = bridge
        .request_file_operation("ghost", "file:read", json!({}), Duration::from_secs(2))
        .await;
    assert!(response.is_none());
}

#[tokio::test]
async fn connection_refused_maps_to_failure_envelope() {
    // Nothing is listening on this port.
    let free_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let bridge = RemoteRpcBridge::for_port(free_port, TOKEN).unwrap();
    let response = bridge
        .request_file_operation("A", "file:read", json!({}), Duration::from_secs(1))
        .await
        .unwrap();
    assert!(!response.success);
    assert_eq!(
        response.error.as_deref(),
        Some("Connection refused - no MCP server running")
    );
}

#[tokio::test]
async fn election_first_host_then_client() {
    let free_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let first = elect(free_port, TOKEN).await.unwrap();
    let Role::Host { hub, addr, server: _server } = first else {
        panic!("first process should become host");
    };
    assert_eq!(addr.port(), free_port);

    let second = elect(free_port, TOKEN).await.unwrap();
    let Role::RpcClient { bridge, token_mismatch } = second else {
        panic!("second process should attach as rpc client");
    };
    assert!(!token_mismatch);

    // The attached client sees the host's vault list unchanged.
    let _socket = register_vault(free_port, TOKEN, "A").await;
    assert_eq!(bridge.connected_vaults().await, vec!["A"]);
    assert_eq!(hub.connected_vaults().await, vec!["A"]);
}

#[tokio::test]
async fn election_reports_token_mismatch() {
    let free_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let _host = elect(free_port, TOKEN).await.unwrap();
    let second = elect(free_port, "different-token").await.unwrap();
    let Role::RpcClient { token_mismatch, .. } = second else {
        panic!("should still attach as rpc client");
    };
    assert!(token_mismatch);
}
