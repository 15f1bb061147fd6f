//! Bridge MCP server binary.
//!
//! Startup: load the config seed, run the port election, wire the vault
//! backend for whichever role we got, start background graph initialization
//! (host only), then serve MCP over stdio.

use std::path::PathBuf;
use std::sync::Arc;

use bridge_config::BridgeConfig;
use graph_ingest::graph::ProviderFactory;
use graph_ingest::graph::memory::InMemoryFactory;
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use vault_hub::{Role, VaultLink, elect};

use graph_bridge_mcp::server::GraphSlot;
use graph_bridge_mcp::{BridgeServer, CliBackend, HubBackend, VaultBackend};

fn load_config() -> anyhow::Result<Arc<BridgeConfig>> {
    let config_path = std::env::var_os("MCP_CONFIG_PATH")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("MCP_CONFIG_PATH environment variable not set"))?;
    let mut config = BridgeConfig::from_file(&config_path)?;
    // VAULT_PATH wins over whatever the seed carries.
    if let Some(vault_path) = std::env::var_os("VAULT_PATH") {
        config.vault_path = Some(PathBuf::from(vault_path));
    }
    tracing::info!("configuration loaded: {}", config.redacted());
    Ok(Arc::new(config))
}

/// Best-effort editor launch via its URL scheme; harmless when already open.
fn launch_editor(vault_name: &str) {
    if vault_name.is_empty() {
        return;
    }
    let url = format!("obsidian://open?vault={vault_name}");
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(target_os = "windows") {
        "explorer"
    } else {
        "xdg-open"
    };
    tracing::info!("opening editor vault: {url}");
    let _ = std::process::Command::new(opener)
        .arg(&url)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();
}

fn spawn_graph_init(config: Arc<BridgeConfig>, slot: GraphSlot) {
    tokio::spawn(async move {
        tracing::info!("starting background graph initialization");
        let factory = InMemoryFactory;
        match factory.connect(&config).await {
            Ok(client) => {
                slot.install(client).await;
                tracing::info!("graph initialization complete - memory tools ready");
            }
            Err(err) => {
                tracing::error!("graph initialization failed: {err}");
                slot.mark_failed();
            }
        }
    });
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("fatal initialization error: {err}");
            std::process::exit(1);
        }
    };

    // The CLI backend sidesteps the hub for vault tools; the election still
    // runs so the memory tools land on exactly one host.
    let cli_backend: Option<Arc<dyn VaultBackend>> = if config.use_cli_file_tools {
        match CliBackend::from_detected_binary(Some(config.default_namespace.clone())) {
            Ok(backend) => Some(Arc::new(backend)),
            Err(err) => {
                tracing::warn!("CLI backend unavailable: {err}");
                None
            }
        }
    } else {
        None
    };

    let (backend, backend_error, rpc_mode) =
        match elect(config.ws_port, &config.ws_auth_token).await {
            Ok(Role::Host { hub, addr, server: _server }) => {
                tracing::info!("elected host on {addr}");
                launch_editor(&config.default_namespace);
                let link: Arc<dyn VaultLink> = hub;
                let backend: Arc<dyn VaultBackend> = match &cli_backend {
                    Some(cli) => cli.clone(),
                    None => Arc::new(HubBackend::new(link)),
                };
                (Some(backend), None, false)
            }
            Ok(Role::RpcClient { bridge, token_mismatch }) => {
                if token_mismatch {
                    tracing::error!(
                        "token mismatch with existing host - check wsAuthToken matches across \
                         all MCP clients"
                    );
                }
                let link: Arc<dyn VaultLink> = bridge;
                let backend: Arc<dyn VaultBackend> = match &cli_backend {
                    Some(cli) => cli.clone(),
                    None => Arc::new(HubBackend::new(link)),
                };
                (Some(backend), None, true)
            }
            Err(err) => {
                tracing::error!("election failed: {err}");
                (cli_backend.clone(), Some(err.to_string()), false)
            }
        };

    let (server, slot) = BridgeServer::new(config.clone(), backend, backend_error, rpc_mode);

    if rpc_mode {
        // The host owns the graph client; unblock waiters immediately.
        slot.mark_failed();
        tracing::info!("rpc-client role - memory tools routed to the host process");
    } else {
        spawn_graph_init(config, slot);
    }

    let serve = tokio::select! {
        result = server.run_stdio() => result,
        _ = tokio::signal::ctrl_c() => {
            // Structured interrupt record on stdout, then a failure exit.
            let record = json!({
                "success": false,
                "message": "Bridge process interrupted by user",
                "exception": "KeyboardInterrupt",
            });
            println!("{record}");
            std::process::exit(1);
        }
    };

    match serve {
        Ok(()) => {}
        Err(err) => {
            tracing::error!("fatal server error: {err}");
            std::process::exit(1);
        }
    }
}
