//! HTTP surface of the hub.
//!
//! Binds `127.0.0.1` only and serves:
//! - `GET /health`: authenticated status snapshot (safe to poll),
//! - `GET /ws` and `GET /`: WebSocket upgrade for editor plugins,
//! - `POST /rpc`: vault operations from peer bridge processes.
//!
//! A first-hop middleware rejects any non-loopback peer with 403 before
//! handler dispatch; bearer auth accepts a header or `?token=`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        ConnectInfo, Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::hub::{VaultHub, VaultLink};
use crate::protocol::{
    RPC_DEFAULT_TIMEOUT_SECS, RPC_MAX_BODY_BYTES, RPC_MAX_TIMEOUT_SECS, RpcRequest, now_timestamp,
};

/// Authentication failure close code on the WebSocket path.
const WS_AUTH_FAILURE_CLOSE: u16 = 4001;

#[derive(Clone)]
struct AppState {
    hub: Arc<VaultHub>,
}

/// Bind the hub server on `127.0.0.1:<port>` and serve it in a background
/// task. Fails with `AddrInUse` when another host already owns the port;
/// the elector relies on that.
pub async fn start_server(
    hub: Arc<VaultHub>,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(("127.0.0.1", hub.port())).await?;
    let addr = listener.local_addr()?;

    let state = AppState { hub };
    let app = Router::new()
        .route("/health", get(health))
        .route("/rpc", post(rpc))
        .route("/ws", get(ws_upgrade))
        .route("/", get(ws_upgrade))
        .layer(middleware::from_fn(loopback_only))
        .layer(axum::extract::DefaultBodyLimit::max(RPC_MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let task = tokio::spawn(async move {
        if let Err(err) = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        {
            tracing::error!("hub server stopped: {err}");
        }
    });

    tracing::info!("hub server started on {addr}");
    Ok((addr, task))
}

/// Reject non-loopback peers before any handler runs.
async fn loopback_only(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    if !peer.ip().is_loopback() {
        return (
            StatusCode::FORBIDDEN,
            axum::Json(json!({"error": "Forbidden - localhost only"})),
        )
            .into_response();
    }
    next.run(request).await
}

#[derive(Debug, serde::Deserialize, Default)]
struct TokenQuery {
    #[serde(default)]
    token: Option<String>,
}

/// Bearer token from the `Authorization` header or the `token` query
/// parameter. An empty configured token disables enforcement.
fn authorized(hub: &VaultHub, headers: &HeaderMap, query: &TokenQuery) -> bool {
    let expected = hub.auth_token();
    if expected.is_empty() {
        return true;
    }
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start_matches("Bearer ").to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| query.token.clone());
    presented.as_deref() == Some(expected)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(json!({"error": "Unauthorized"})),
    )
        .into_response()
}

async fn health(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Response {
    if !authorized(&state.hub, &headers, &query) {
        tracing::warn!("health check authentication failed");
        return unauthorized();
    }
    axum::Json(state.hub.health_snapshot().await).into_response()
}

async fn rpc(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    body: Result<axum::Json<RpcRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
    if !authorized(&state.hub, &headers, &query) {
        tracing::warn!("rpc authentication failed");
        return unauthorized();
    }

    let request = match body {
        Ok(axum::Json(request)) => request,
        Err(rejection) => {
            // The body-limit layer surfaces oversized payloads here.
            let status = rejection.status();
            let error = if status == StatusCode::PAYLOAD_TOO_LARGE {
                "Payload too large"
            } else {
                "Invalid JSON"
            };
            return (status, axum::Json(json!({"error": error}))).into_response();
        }
    };

    let Some(operation) = request.operation.filter(|o| !o.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({"error": "Missing operation"})),
        )
            .into_response();
    };
    let vault_id = request.vault_id.unwrap_or_default();

    let timeout_secs = request
        .timeout_ms
        .map(|ms| ms as f64 / 1000.0)
        .unwrap_or(RPC_DEFAULT_TIMEOUT_SECS)
        .min(RPC_MAX_TIMEOUT_SECS);
    tracing::debug!("executing {operation} on vault {vault_id} with timeout {timeout_secs}s");

    let result = state
        .hub
        .request_file_operation(
            &vault_id,
            &operation,
            request.params,
            Duration::from_secs_f64(timeout_secs),
        )
        .await;

    match result {
        None => (
            StatusCode::NOT_FOUND,
            axum::Json(json!({
                "success": false,
                "error": format!("No connected vault found: {vault_id}"),
            })),
        )
            .into_response(),
        Some(response) if response.is_timeout() => (
            StatusCode::GATEWAY_TIMEOUT,
            axum::Json(json!({
                "success": false,
                "error": "Request timeout",
            })),
        )
            .into_response(),
        Some(response) => axum::Json(json!({
            "success": response.success,
            "result": response.payload,
            "error": response.error,
            "timestamp": response.timestamp.unwrap_or_else(|| json!(now_timestamp())),
        }))
        .into_response(),
    }
}

async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let authorized = authorized(&state.hub, &headers, &query);
    upgrade.on_upgrade(move |socket| ws_session(state.hub, socket, authorized))
}

async fn ws_session(hub: Arc<VaultHub>, socket: WebSocket, authorized: bool) {
    let (mut sink, mut stream) = socket.split();

    if !authorized {
        tracing::warn!("websocket authentication failed - closing with {WS_AUTH_FAILURE_CLOSE}");
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: WS_AUTH_FAILURE_CLOSE,
                reason: "Authentication failed".into(),
            })))
            .await;
        return;
    }

    let (client_id, mut outbound, welcome) = hub.connect_client().await;
    if send_json(&mut sink, &welcome).await.is_err() {
        hub.disconnect_client(&client_id).await;
        return;
    }

    // Writer: forwards hub-originated frames (file operation requests and
    // direct replies) to the socket. Each send is atomic at the frame level.
    let (reply_tx, mut reply_rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                Some(frame) = outbound.recv() => frame,
                Some(frame) = reply_rx.recv() => frame,
                else => break,
            };
            if send_json(&mut sink, &frame).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<Value>(&text) {
                Ok(value) => {
                    if let Some(reply) = hub.handle_message(&client_id, value).await {
                        if reply_tx.send(reply).is_err() {
                            break;
                        }
                    }
                }
                Err(err) => {
                    tracing::error!("JSON decode error from client {client_id}: {err}");
                    let _ = reply_tx.send(json!({"type": "error", "error": "Invalid JSON"}));
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("websocket close from client {client_id}");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!("websocket error for client {client_id}: {err}");
                break;
            }
        }
    }

    writer.abort();
    hub.disconnect_client(&client_id).await;
}

async fn send_json(
    sink: &mut (impl futures::Sink<Message, Error = axum::Error> + Unpin),
    value: &Value,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    sink.send(Message::Text(text.into())).await
}
