//! Ingestion daemon core.
//!
//! Protocol: one JSON object per line on stdin, one JSON response line on
//! stdout, strictly in order. Stdout carries nothing but protocol JSON; all
//! diagnostics go to stderr. The daemon exists so the reranker and other
//! heavy provider state load once and then service many episode-creation
//! requests.

use std::path::PathBuf;
use std::sync::Arc;

use bridge_config::BridgeConfig;
use graph_ingest::NotePipeline;
use graph_ingest::graph::{ProviderFactory, RerankerStatus};
use serde_json::{Value, json};

/// Daemon state: warmed models plus the run flag.
pub struct IngestDaemon {
    factory: Arc<dyn ProviderFactory>,
    reranker: RerankerStatus,
    running: bool,
    /// Explicit override for the plugin `data.json` location.
    plugin_data_path: Option<PathBuf>,
}

impl IngestDaemon {
    /// Construct and warm up. The reranker load is offline-only; a missing
    /// model is reported in the handshake rather than fetched.
    pub fn new(factory: Arc<dyn ProviderFactory>, plugin_data_path: Option<PathBuf>) -> Self {
        let reranker = factory.warm_reranker();
        if !reranker.loaded {
            tracing::warn!("reranker warm-up did not load a model");
        }
        IngestDaemon {
            factory,
            reranker,
            running: true,
            plugin_data_path,
        }
    }

    pub fn running(&self) -> bool {
        self.running
    }

    /// The single handshake line printed before the command loop.
    pub fn ready_message(&self) -> Value {
        json!({
            "status": "ready",
            "bge_loaded": self.reranker.loaded,
            "timestamp": chrono_now(),
        })
    }

    /// Handle one parsed command and produce its response line.
    pub async fn handle_command(&mut self, command: Value) -> Value {
        match command.get("command").and_then(Value::as_str) {
            Some("sync") => {
                let config = command.get("config").cloned().unwrap_or_else(|| json!({}));
                self.run_sync(config).await
            }
            Some("status") => json!({
                "status": "success",
                "bge_loaded": self.reranker.loaded,
                "running": self.running,
            }),
            Some("shutdown") => {
                self.running = false;
                json!({"status": "success", "message": "Daemon shutting down"})
            }
            other => json!({
                "status": "error",
                "message": format!("Unknown command: {}", other.unwrap_or("<missing>")),
            }),
        }
    }

    /// Handle one raw input line (parse errors become protocol errors).
    pub async fn handle_line(&mut self, line: &str) -> Option<Value> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(command) => Some(self.handle_command(command).await),
            Err(err) => Some(json!({
                "status": "error",
                "message": format!("Invalid JSON: {err}"),
            })),
        }
    }

    /// One `sync` command: rebuild a graph client, run the single-note
    /// pipeline, close the client, answer with the episode result envelope.
    async fn run_sync(&self, config_value: Value) -> Value {
        let Some(map) = config_value.as_object() else {
            return error_response("Invalid configuration: expected an object");
        };
        let config = BridgeConfig::from_map(map);
        if config.notes.len() != 1 {
            return error_response(format!("Expected exactly 1 note, got {}", config.notes.len()));
        }

        let graph = match self.factory.connect(&config).await {
            Ok(graph) => graph,
            Err(err) => return error_response(format!("Failed to initialize graph client: {err}")),
        };

        let note_path = config.notes[0].clone();
        let pipeline = NotePipeline::new(
            Arc::new(config),
            graph.clone(),
            self.plugin_data_path.as_deref(),
        );
        let outcome = pipeline.process_note(&note_path).await;

        if let Err(err) = graph.close().await {
            tracing::warn!("error closing graph client: {err}");
        }

        match outcome {
            Ok(Some(result)) => serde_json::to_value(result)
                .unwrap_or_else(|err| error_response(format!("Failed to encode result: {err}"))),
            Ok(None) => error_response("No result generated"),
            Err(err) => error_response(err.to_string()),
        }
    }
}

fn error_response(message: impl Into<String>) -> Value {
    json!({"status": "error", "message": message.into()})
}

fn chrono_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
