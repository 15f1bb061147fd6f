//! Process election.
//!
//! At most one bridge process per machine hosts the hub. Startup probes the
//! well-known port's `/health`; a live answer means we attach as an RPC
//! client, otherwise we try to bind. If another process wins the bind race
//! in between, one re-probe decides. The elected role is final for the
//! process lifetime.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::hub::VaultHub;
use crate::rpc::RemoteRpcBridge;
use crate::server::start_server;

/// Election must be fast; discovery gets 200 ms.
const PROBE_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug)]
pub enum ProbeOutcome {
    /// A host answered 200; payload is its health snapshot.
    Healthy(Value),
    /// A host answered 401: something is listening but our token is wrong.
    Unauthorized,
    /// Nothing usable on the port.
    Unreachable,
}

/// Probe `/health` on the configured port within the 200 ms window.
pub async fn probe_health(port: u16, auth_token: &str) -> ProbeOutcome {
    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(client) => client,
        Err(_) => return ProbeOutcome::Unreachable,
    };
    let mut request = client.get(format!("http://127.0.0.1:{port}/health"));
    if !auth_token.is_empty() {
        request = request.header(reqwest::header::AUTHORIZATION, format!("Bearer {auth_token}"));
    }
    match request.send().await {
        Ok(response) => match response.status().as_u16() {
            200 => match response.json::<Value>().await {
                Ok(data) => {
                    tracing::info!(
                        "health probe successful - server status: {}",
                        data.get("status").and_then(serde_json::Value::as_str).unwrap_or("unknown")
                    );
                    ProbeOutcome::Healthy(data)
                }
                Err(_) => ProbeOutcome::Unreachable,
            },
            401 => ProbeOutcome::Unauthorized,
            status => {
                tracing::warn!("health probe failed - HTTP {status}");
                ProbeOutcome::Unreachable
            }
        },
        Err(_) => {
            tracing::info!("no server found on health probe");
            ProbeOutcome::Unreachable
        }
    }
}

/// The role this process plays for its lifetime.
pub enum Role {
    /// We bound the port and run the hub.
    Host {
        hub: Arc<VaultHub>,
        addr: SocketAddr,
        server: JoinHandle<()>,
    },
    /// A host already exists; we proxy through it.
    RpcClient {
        bridge: Arc<RemoteRpcBridge>,
        /// The host rejected our token; vault operations will fail with
        /// authentication errors until tokens agree.
        token_mismatch: bool,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ElectError {
    #[error("port conflict on {0} - no accessible server found")]
    PortConflict(u16),
    #[error("failed to start hub server: {0}")]
    Bind(#[from] std::io::Error),
    #[error("failed to attach rpc client: {0}")]
    Attach(#[from] crate::rpc::RpcBridgeError),
}

/// Run the election for `port`.
pub async fn elect(port: u16, auth_token: &str) -> Result<Role, ElectError> {
    tracing::info!("probing for existing hub on port {port}");
    match probe_health(port, auth_token).await {
        ProbeOutcome::Healthy(_) => {
            tracing::info!("existing hub found - attaching as rpc client");
            let bridge = RemoteRpcBridge::for_port(port, auth_token)?;
            return Ok(Role::RpcClient { bridge: Arc::new(bridge), token_mismatch: false });
        }
        ProbeOutcome::Unauthorized => {
            tracing::error!(
                "authentication failed - token mismatch with existing hub; \
                 attaching as rpc client anyway"
            );
            let bridge = RemoteRpcBridge::for_port(port, auth_token)?;
            return Ok(Role::RpcClient { bridge: Arc::new(bridge), token_mismatch: true });
        }
        ProbeOutcome::Unreachable => {}
    }

    tracing::info!("no existing hub - attempting to bind port {port}");
    let hub = Arc::new(VaultHub::new(port, auth_token));
    match start_server(hub.clone()).await {
        Ok((addr, server)) => {
            tracing::info!("elected host on {addr}");
            Ok(Role::Host { hub, addr, server })
        }
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            // Lost the bind race; someone else became host in between.
            tracing::info!("port {port} in use during startup - retrying discovery");
            match probe_health(port, auth_token).await {
                ProbeOutcome::Healthy(_) | ProbeOutcome::Unauthorized => {
                    let bridge = RemoteRpcBridge::for_port(port, auth_token)?;
                    tracing::info!("hub discovered on retry - attaching as rpc client");
                    Ok(Role::RpcClient { bridge: Arc::new(bridge), token_mismatch: false })
                }
                ProbeOutcome::Unreachable => Err(ElectError::PortConflict(port)),
            }
        }
        Err(err) => Err(ElectError::Bind(err)),
    }
}
