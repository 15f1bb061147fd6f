//! Ingestion daemon binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use graph_ingest::graph::memory::InMemoryFactory;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ingest_daemon::IngestDaemon;

#[derive(Parser, Debug)]
#[command(name = "ingest-daemon")]
#[command(about = "Episode ingestion daemon (line-framed JSON over stdio)")]
struct Args {
    /// Explicit path to the plugin data.json (overrides probing and env)
    #[arg(long)]
    plugin_data_path: Option<PathBuf>,

    /// Enable verbose logging (stderr only)
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Stdout is the protocol channel; every log line goes to stderr.
    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .init();

    let plugin_data_path = args
        .plugin_data_path
        .or_else(|| std::env::var_os("PLUGIN_DATA_PATH").map(PathBuf::from));

    let mut daemon = IngestDaemon::new(Arc::new(InMemoryFactory), plugin_data_path);

    let mut stdout = tokio::io::stdout();
    write_line(&mut stdout, &daemon.ready_message()).await?;

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        };
        let Some(line) = line else {
            tracing::info!("stdin closed, shutting down");
            break;
        };

        if let Some(response) = daemon.handle_line(&line).await {
            write_line(&mut stdout, &response).await?;
        }
        if !daemon.running() {
            break;
        }
    }

    Ok(())
}

async fn write_line(stdout: &mut tokio::io::Stdout, value: &serde_json::Value) -> Result<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    stdout.write_all(&line).await?;
    stdout.flush().await?;
    Ok(())
}
