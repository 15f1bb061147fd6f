//! The MCP tool dispatcher.
//!
//! Two tool families over stdio: memory tools drive the graph client, vault
//! tools drive the [`VaultBackend`]. Graph tools wait (bounded) for the
//! background graph initialization; vault tools never do. In the RPC-client
//! role the memory family short-circuits with a pointer to the host process.

use std::sync::Arc;
use std::time::Duration;

use bridge_config::BridgeConfig;
use chrono::Utc;
use graph_ingest::graph::{
    EpisodeSource, EpisodeSubmission, FactQuery, GraphClient, NodeQuery,
};
use graph_ingest::queue::EpisodeQueues;
use graph_ingest::schema::{Schema, load_schema_cached};
use obsidian_fs::plugin_data_path;
use rmcp::{
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    service::{RequestContext, RoleServer},
    tool, tool_handler, tool_router,
    transport::stdio,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::{RwLock, watch};

use crate::backend::{UpdateNoteRequest, VaultBackend};

/// How long graph tools wait for background initialization.
const READINESS_TIMEOUT: Duration = Duration::from_secs(20);

pub const STATUS_RESOURCE_URI: &str = "mcp://status";

// ---------------------------------------------------------------------------
// Tool parameters

/// Parameters for the add_memory tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddMemoryParams {
    /// Name of the episode
    pub name: Option<String>,
    /// The memory content to add (episode body)
    pub content: String,
    /// Source type (text, json, message)
    #[serde(default)]
    pub source: Option<String>,
    /// Description of the source
    #[serde(default, alias = "sourceDescription")]
    pub source_description: Option<String>,
    /// Group ID for organizing memories
    #[serde(default, alias = "groupId")]
    pub group_id: Option<String>,
    /// Optional UUID for the episode
    #[serde(default)]
    pub uuid: Option<String>,
}

/// One message of a recorded conversation
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ConversationMessage {
    /// Message role (user or assistant)
    pub role: String,
    /// Message content
    pub content: String,
    /// Optional ISO 8601 timestamp
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Parameters for the add_conversation_memory tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddConversationParams {
    /// Name for the conversation episode
    #[serde(default)]
    pub name: Option<String>,
    /// Array of message objects
    pub conversation: Vec<ConversationMessage>,
    /// Group ID for organizing memories
    #[serde(default, alias = "groupId")]
    pub group_id: Option<String>,
    /// Source description
    #[serde(default, alias = "sourceDescription")]
    pub source_description: Option<String>,
}

/// Parameters for the search_memory_nodes tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchNodesParams {
    /// Search query
    pub query: String,
    /// Max results
    #[serde(default, alias = "maxNodes")]
    pub max_nodes: Option<usize>,
    /// Optional list of group IDs to search in
    #[serde(default, alias = "groupIds")]
    pub group_ids: Option<Vec<String>>,
    /// UUID of a node to bias ranking toward (graph proximity)
    #[serde(default, alias = "centerNodeUuid")]
    pub center_node_uuid: Option<String>,
    /// Filter results to these entity labels
    #[serde(default, alias = "entityTypes")]
    pub entity_types: Option<Vec<String>>,
}

/// Parameters for the search_memory_facts tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchFactsParams {
    /// Search query
    pub query: String,
    /// Max results
    #[serde(default, alias = "maxFacts")]
    pub max_facts: Option<usize>,
    /// Optional list of group IDs to search in
    #[serde(default, alias = "groupIds")]
    pub group_ids: Option<Vec<String>>,
    /// UUID of a node to bias ranking toward (graph proximity)
    #[serde(default, alias = "centerNodeUuid")]
    pub center_node_uuid: Option<String>,
}

/// Parameters for the get_episodes tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetEpisodesParams {
    /// Group ID to retrieve episodes from
    #[serde(default, alias = "groupId")]
    pub group_id: Option<String>,
    /// Number of most recent episodes to retrieve
    #[serde(default, alias = "lastN")]
    pub last_n: Option<usize>,
}

/// Parameters for the delete_episode tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteEpisodeParams {
    /// Episode ID to delete
    #[serde(alias = "episodeId")]
    pub episode_id: String,
}

/// Parameters for the delete_entity_edge tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteEntityEdgeParams {
    /// UUID of the entity edge to delete
    pub uuid: String,
}

/// Parameters for the get_entity_edge tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetEntityEdgeParams {
    /// Entity name
    #[serde(alias = "entityName")]
    pub entity_name: String,
    /// Optional substring filter on the edge fact
    #[serde(default, alias = "edgeType")]
    pub edge_type: Option<String>,
}

/// Parameters for the search_obsidian_notes tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchNotesParams {
    /// Search query
    pub query: String,
    /// Search mode: filename, content, or both
    #[serde(default, alias = "searchMode")]
    pub search_mode: Option<String>,
    /// Maximum number of results to return
    #[serde(default, alias = "maxResults")]
    pub max_results: Option<u32>,
    /// Include context snippets for content matches
    #[serde(default, alias = "includeContext")]
    pub include_context: Option<bool>,
    /// Path to search within the vault
    #[serde(default)]
    pub path: Option<String>,
    /// Vault ID (optional)
    #[serde(default, alias = "vaultId")]
    pub vault_id: Option<String>,
}

/// Parameters for the read_obsidian_note tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadNoteParams {
    /// Note path
    pub path: String,
    /// Include line-by-line mapping and section detection for precise edits
    #[serde(default, alias = "includeLineMap")]
    pub include_line_map: Option<bool>,
    /// Vault ID (optional)
    #[serde(default, alias = "vaultId")]
    pub vault_id: Option<String>,
}

/// Parameters for the create_obsidian_note tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateNoteParams {
    /// Note path
    pub path: String,
    /// Note content
    pub content: String,
    /// Vault ID (optional)
    #[serde(default, alias = "vaultId")]
    pub vault_id: Option<String>,
}

/// Parameters for the update_obsidian_note tool. `operation` is accepted as
/// an alias for `editing_mode`, including its shorthand values.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateNoteParams {
    /// Note path
    pub path: String,
    /// Editing mode: full_file, frontmatter_only, append_only, range_based, editor_based
    #[serde(default, alias = "editingMode", alias = "operation")]
    pub editing_mode: Option<String>,
    /// New content (full_file mode)
    #[serde(default)]
    pub content: Option<String>,
    /// Frontmatter properties to update (frontmatter_only mode)
    #[serde(default, alias = "frontmatterChanges")]
    pub frontmatter_changes: Option<Map<String, Value>>,
    /// Content to append (append_only mode)
    #[serde(default, alias = "appendContent")]
    pub append_content: Option<String>,
    /// Replacement content (range_based mode)
    #[serde(default, alias = "replacementContent")]
    pub replacement_content: Option<String>,
    /// Starting line number, 1-based (range_based mode)
    #[serde(default, alias = "rangeStartLine")]
    pub range_start_line: Option<i64>,
    /// Starting character position, 0-based (range_based mode)
    #[serde(default, alias = "rangeStartChar")]
    pub range_start_char: Option<i64>,
    /// Ending line number (range_based mode, defaults to start line)
    #[serde(default, alias = "rangeEndLine")]
    pub range_end_line: Option<i64>,
    /// Ending character position (range_based mode, defaults to end of line)
    #[serde(default, alias = "rangeEndChar")]
    pub range_end_char: Option<i64>,
    /// Editor method name (editor_based mode)
    #[serde(default, alias = "editorMethod")]
    pub editor_method: Option<String>,
    /// Vault ID (optional)
    #[serde(default, alias = "vaultId")]
    pub vault_id: Option<String>,
    /// Method-specific pass-through parameters (editor_based mode)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parameters for the explore_vault_folders tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExploreFoldersParams {
    /// Explicit vault path to explore
    #[serde(default)]
    pub path: Option<String>,
    /// Natural language or path query
    #[serde(default)]
    pub query: Option<String>,
    /// Output format: tree, flat, paths, or smart
    #[serde(default)]
    pub format: Option<String>,
    /// Maximum traversal depth
    #[serde(default, alias = "maxDepth")]
    pub max_depth: Option<u32>,
    /// Vault ID (optional)
    #[serde(default, alias = "vaultId")]
    pub vault_id: Option<String>,
}

/// Parameters for the create_note_with_template tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateWithTemplateParams {
    /// Template request type (fuzzy-matched against template names)
    #[serde(alias = "requestType")]
    pub request_type: String,
    /// Filename to create
    #[serde(alias = "fileName")]
    pub file_name: String,
    /// Optional content appended after template processing
    #[serde(default)]
    pub content: Option<String>,
    /// Target folder path in the vault
    #[serde(default, alias = "targetFolder")]
    pub target_folder: Option<String>,
    /// Vault ID (optional)
    #[serde(default, alias = "vaultId")]
    pub vault_id: Option<String>,
}

/// Parameters for the manage_obsidian_notes tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ManageNotesParams {
    /// Operation: delete or rename
    pub operation: String,
    /// Note path (source path for rename)
    pub path: String,
    /// New note path (rename only)
    #[serde(default, rename = "newPath", alias = "new_path")]
    pub new_path: Option<String>,
    /// Vault ID (optional)
    #[serde(default, alias = "vaultId")]
    pub vault_id: Option<String>,
}

/// Parameters for the manage_obsidian_folders tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ManageFoldersParams {
    /// Operation: create, rename, or delete
    pub operation: String,
    /// Folder path (source path for rename/delete, target for create)
    #[serde(rename = "folderPath", alias = "folder_path")]
    pub folder_path: String,
    /// New folder path (rename only)
    #[serde(default, rename = "newFolderPath", alias = "new_folder_path")]
    pub new_folder_path: Option<String>,
    /// Vault ID (optional)
    #[serde(default, alias = "vaultId")]
    pub vault_id: Option<String>,
}

/// Map legacy shorthand mode values onto the canonical editing modes.
fn normalize_editing_mode(mode: &str) -> String {
    match mode {
        "frontmatter" => "frontmatter_only",
        "append" => "append_only",
        "range" => "range_based",
        "editor" => "editor_based",
        "full" => "full_file",
        other => other,
    }
    .to_string()
}

// ---------------------------------------------------------------------------
// Server state

/// Writer side of the readiness gate; owned by the background initializer.
pub struct GraphSlot {
    graph: Arc<RwLock<Option<Arc<dyn GraphClient>>>>,
    ready_tx: watch::Sender<bool>,
}

impl GraphSlot {
    /// Install the initialized graph client and release every waiter.
    pub async fn install(&self, client: Arc<dyn GraphClient>) {
        *self.graph.write().await = Some(client);
        let _ = self.ready_tx.send(true);
    }

    /// Initialization failed; release waiters so tools answer with an error
    /// instead of blocking forever.
    pub fn mark_failed(&self) {
        let _ = self.ready_tx.send(true);
    }
}

/// The MCP server state shared by every tool handler.
#[derive(Clone)]
pub struct BridgeServer {
    config: Arc<BridgeConfig>,
    graph: Arc<RwLock<Option<Arc<dyn GraphClient>>>>,
    /// This process lost the election; memory tools live on the host.
    rpc_mode: bool,
    backend: Option<Arc<dyn VaultBackend>>,
    backend_error: Option<String>,
    queues: EpisodeQueues,
    ready_rx: watch::Receiver<bool>,
    tool_router: ToolRouter<Self>,
}

fn json_result(value: Value) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::success(vec![Content::text(value.to_string())]))
}

#[tool_router]
impl BridgeServer {
    /// Build the server. Returns the writer handle the startup code uses to
    /// finish (or fail) background graph initialization.
    pub fn new(
        config: Arc<BridgeConfig>,
        backend: Option<Arc<dyn VaultBackend>>,
        backend_error: Option<String>,
        rpc_mode: bool,
    ) -> (Self, GraphSlot) {
        let graph = Arc::new(RwLock::new(None));
        let (ready_tx, ready_rx) = watch::channel(false);
        let server = BridgeServer {
            config,
            graph: graph.clone(),
            rpc_mode,
            backend,
            backend_error,
            queues: EpisodeQueues::new(),
            ready_rx,
            tool_router: Self::tool_router(),
        };
        (server, GraphSlot { graph, ready_tx })
    }

    /// Serve over stdio until the client disconnects.
    pub async fn run_stdio(self) -> anyhow::Result<()> {
        let service = self.serve(stdio()).await.inspect_err(|e| {
            tracing::error!("error starting server: {e}");
        })?;
        tracing::info!("bridge MCP server started");
        service.waiting().await?;
        Ok(())
    }

    /// Wait (bounded) for background graph initialization, then take the
    /// client. `None` means still initializing or failed.
    async fn graph_client(&self) -> Option<Arc<dyn GraphClient>> {
        if !*self.ready_rx.borrow() {
            let mut rx = self.ready_rx.clone();
            if tokio::time::timeout(READINESS_TIMEOUT, rx.wait_for(|ready| *ready))
                .await
                .is_err()
            {
                return None;
            }
        }
        self.graph.read().await.clone()
    }

    /// Common guard for the memory tool family. Errors come back as
    /// ready-made result envelopes.
    async fn memory_guard(&self) -> Result<Arc<dyn GraphClient>, Value> {
        if self.rpc_mode {
            return Err(json!({
                "success": false,
                "error": "Memory tools are handled by the host process. This process is an \
                          RPC client - memory tools are automatically available in the main \
                          session.",
                "note": "No action needed - memory tools work transparently across processes.",
            }));
        }
        match self.graph_client().await {
            Some(graph) => Ok(graph),
            None => Err(json!({
                "success": false,
                "error": "Graph initialization still in progress - please try again in a few moments",
            })),
        }
    }

    fn vault_backend(&self) -> Result<Arc<dyn VaultBackend>, Value> {
        match &self.backend {
            Some(backend) => Ok(backend.clone()),
            None => Err(json!({
                "success": false,
                "error": "No vault backend available",
                "details": self.backend_error.clone().unwrap_or_else(|| "Backend not initialized".to_string()),
            })),
        }
    }

    fn custom_ontology_schema(&self) -> Option<Arc<Schema>> {
        if !self.config.use_custom_ontology {
            return None;
        }
        let vault = self.config.vault_path.as_deref()?;
        let explicit = std::env::var_os("PLUGIN_DATA_PATH").map(std::path::PathBuf::from);
        let data_path = plugin_data_path(vault, explicit.as_deref());
        match load_schema_cached(&data_path) {
            Ok(schema) => Some(schema),
            Err(err) => {
                tracing::warn!("custom ontology schema load failed: {err}");
                None
            }
        }
    }

    fn default_group_id(&self) -> String {
        self.config.default_namespace.clone()
    }

    // --- memory tools ----------------------------------------------------

    #[tool(description = "Add a memory/episode to the knowledge graph. Episodes for the same group are processed strictly in order; different groups run concurrently.")]
    async fn add_memory(
        &self,
        params: Parameters<AddMemoryParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let graph = match self.memory_guard().await {
            Ok(graph) => graph,
            Err(envelope) => return json_result(envelope),
        };
        let params = params.0;
        let group_id = params
            .group_id
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| self.default_group_id());

        let name = params
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("Episode_{}", Utc::now().format("%Y%m%d_%H%M%S")));
        let schema = self.custom_ontology_schema();

        let mut submission = EpisodeSubmission::text(name, params.content);
        submission.source = EpisodeSource::parse(params.source.as_deref().unwrap_or("text"));
        submission.source_description = params
            .source_description
            .unwrap_or_else(|| "MCP server memory addition".to_string());
        submission.uuid = params.uuid;
        submission.reference_time = Utc::now();
        submission.group_id = graph.supports_group_ids().then(|| group_id.clone());
        if let Some(schema) = schema {
            submission.entity_types = schema.entity_types.clone();
            submission.edge_types = schema.edge_types.clone();
            submission.allowed_edges_by_pair = schema.edge_type_map.clone();
        }

        let queue_group = group_id.clone();
        let position = self
            .queues
            .submit(&group_id, async move {
                if let Err(err) = graph.add_episode(submission).await {
                    tracing::error!("episode processing error for {queue_group}: {err}");
                }
            })
            .await;

        json_result(json!({
            "success": true,
            "message": format!("Episode queued (position: {position})"),
        }))
    }

    #[tool(description = "Add a conversation to the graph as a single message-typed episode. Each message is recorded as '[timestamp] role: content'.")]
    async fn add_conversation_memory(
        &self,
        params: Parameters<AddConversationParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let graph = match self.memory_guard().await {
            Ok(graph) => graph,
            Err(envelope) => return json_result(envelope),
        };
        let params = params.0;
        if params.conversation.is_empty() {
            return json_result(json!({
                "success": false,
                "error": "conversation parameter required and must be a non-empty array",
            }));
        }

        let lines: Vec<String> = params
            .conversation
            .iter()
            .map(|message| {
                let timestamp = message
                    .timestamp
                    .clone()
                    .unwrap_or_else(|| Utc::now().to_rfc3339());
                format!("[{timestamp}] {}: {}", message.role, message.content)
            })
            .collect();

        let name = params
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("Conversation_{}", Utc::now().format("%Y%m%d_%H%M%S")));
        let group_id = params
            .group_id
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| self.default_group_id());

        let mut submission = EpisodeSubmission::text(name, lines.join("\n"));
        submission.source = EpisodeSource::Message;
        submission.source_description = params
            .source_description
            .unwrap_or_else(|| "Conversation memory from MCP".to_string());
        submission.group_id = graph.supports_group_ids().then(|| group_id);
        if let Some(schema) = self.custom_ontology_schema() {
            submission.entity_types = schema.entity_types.clone();
            submission.edge_types = schema.edge_types.clone();
            submission.allowed_edges_by_pair = schema.edge_type_map.clone();
        }
        let message_count = params.conversation.len();

        match graph.add_episode(submission).await {
            Ok(receipt) => json_result(json!({
                "success": true,
                "episode_id": receipt.episode_uuid,
                "message": "Conversation memory added successfully",
                "message_count": message_count,
            })),
            Err(err) => json_result(json!({
                "success": false,
                "error": format!("Memory operation failed: {err}"),
            })),
        }
    }

    #[tool(description = "Search for nodes in the memory graph. With center_node_uuid, ranking is biased toward graph proximity; entity_types filters node labels.")]
    async fn search_memory_nodes(
        &self,
        params: Parameters<SearchNodesParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let graph = match self.memory_guard().await {
            Ok(graph) => graph,
            Err(envelope) => return json_result(envelope),
        };
        let params = params.0;
        let query = NodeQuery {
            query: params.query,
            limit: params.max_nodes.unwrap_or(10),
            group_ids: params
                .group_ids
                .filter(|g| !g.is_empty())
                .unwrap_or_else(|| vec![self.default_group_id()]),
            center_node_uuid: params.center_node_uuid,
            entity_types: params.entity_types.unwrap_or_default(),
        };
        match graph.search_nodes(query).await {
            Ok(nodes) => json_result(json!({"success": true, "results": nodes})),
            Err(err) => json_result(json!({
                "success": false,
                "error": format!("Memory operation failed: {err}"),
            })),
        }
    }

    #[tool(description = "Search for facts (relationships) in the memory graph. With center_node_uuid, ranking is biased toward graph proximity.")]
    async fn search_memory_facts(
        &self,
        params: Parameters<SearchFactsParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let graph = match self.memory_guard().await {
            Ok(graph) => graph,
            Err(envelope) => return json_result(envelope),
        };
        let params = params.0;
        let query = FactQuery {
            query: params.query,
            limit: params.max_facts.unwrap_or(10),
            group_ids: params
                .group_ids
                .filter(|g| !g.is_empty())
                .unwrap_or_else(|| vec![self.default_group_id()]),
            center_node_uuid: params.center_node_uuid,
        };
        match graph.search_facts(query).await {
            Ok(facts) => json_result(json!({"success": true, "facts": facts})),
            Err(err) => json_result(json!({
                "success": false,
                "error": format!("Memory operation failed: {err}"),
            })),
        }
    }

    #[tool(description = "Get the most recent episodes from the memory graph.")]
    async fn get_episodes(
        &self,
        params: Parameters<GetEpisodesParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let graph = match self.memory_guard().await {
            Ok(graph) => graph,
            Err(envelope) => return json_result(envelope),
        };
        let params = params.0;
        let group_ids = vec![
            params
                .group_id
                .filter(|g| !g.is_empty())
                .unwrap_or_else(|| self.default_group_id()),
        ];
        match graph
            .recent_episodes(&group_ids, params.last_n.unwrap_or(10))
            .await
        {
            Ok(episodes) => json_result(json!({
                "success": true,
                "count": episodes.len(),
                "episodes": episodes,
            })),
            Err(err) => json_result(json!({
                "success": false,
                "error": format!("Memory operation failed: {err}"),
            })),
        }
    }

    #[tool(description = "Delete an episode from the memory graph.")]
    async fn delete_episode(
        &self,
        params: Parameters<DeleteEpisodeParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let graph = match self.memory_guard().await {
            Ok(graph) => graph,
            Err(envelope) => return json_result(envelope),
        };
        let episode_id = params.0.episode_id;
        match graph.remove_episode(&episode_id).await {
            Ok(()) => json_result(json!({
                "success": true,
                "episode_id": episode_id,
                "message": "Episode deleted successfully",
            })),
            Err(err) => json_result(json!({
                "success": false,
                "error": format!("Failed to delete episode: {err}"),
                "episode_id": episode_id,
            })),
        }
    }

    #[tool(description = "Delete an entity edge from the memory graph by UUID.")]
    async fn delete_entity_edge(
        &self,
        params: Parameters<DeleteEntityEdgeParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let graph = match self.memory_guard().await {
            Ok(graph) => graph,
            Err(envelope) => return json_result(envelope),
        };
        let uuid = params.0.uuid;
        match graph.delete_edge(&uuid).await {
            Ok(()) => json_result(json!({
                "success": true,
                "message": format!("Entity edge with UUID {uuid} deleted successfully"),
            })),
            Err(err) => json_result(json!({
                "success": false,
                "error": format!("Error deleting entity edge: {err}"),
            })),
        }
    }

    #[tool(description = "Get edges for an entity by name, optionally filtered by a substring on the edge fact.")]
    async fn get_entity_edge(
        &self,
        params: Parameters<GetEntityEdgeParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let graph = match self.memory_guard().await {
            Ok(graph) => graph,
            Err(envelope) => return json_result(envelope),
        };
        let params = params.0;
        match graph
            .edges_for_entity(&params.entity_name, params.edge_type.as_deref())
            .await
        {
            Ok(edges) => json_result(json!({
                "success": true,
                "entity": params.entity_name,
                "edge_type": params.edge_type,
                "count": edges.len(),
                "edges": edges,
            })),
            Err(err) => json_result(json!({
                "success": false,
                "error": format!("Failed to get entity edges: {err}"),
                "entity": params.entity_name,
            })),
        }
    }

    #[tool(description = "Clear the entire memory graph.")]
    async fn clear_graph(&self) -> Result<CallToolResult, ErrorData> {
        let graph = match self.memory_guard().await {
            Ok(graph) => graph,
            Err(envelope) => return json_result(envelope),
        };
        match graph.clear().await {
            Ok(()) => json_result(json!({
                "success": true,
                "message": "Graph cleared successfully",
            })),
            Err(err) => json_result(json!({
                "success": false,
                "error": format!("Memory operation failed: {err}"),
            })),
        }
    }

    #[tool(description = "List all available group IDs (namespaces) for this vault.")]
    async fn list_group_ids(&self) -> Result<CallToolResult, ErrorData> {
        if let Err(envelope) = self.memory_guard().await {
            return json_result(envelope);
        }
        let mut group_ids: Vec<String> = self.config.available_namespaces.clone();
        group_ids.extend(
            self.config
                .folder_namespace_mappings
                .iter()
                .map(|mapping| mapping.group_id.clone()),
        );
        let default = self.default_group_id();
        group_ids.push(default.clone());
        group_ids.sort();
        group_ids.dedup();
        json_result(json!({
            "success": true,
            "count": group_ids.len(),
            "group_ids": group_ids,
            "current_default": default,
        }))
    }

    // --- vault tools ------------------------------------------------------

    #[tool(description = "Search for notes in the Obsidian vault by filename and/or content.")]
    async fn search_obsidian_notes(
        &self,
        params: Parameters<SearchNotesParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let backend = match self.vault_backend() {
            Ok(backend) => backend,
            Err(envelope) => return json_result(envelope),
        };
        let params = params.0;
        let result = backend
            .search_notes(
                &params.query,
                params.search_mode.as_deref().unwrap_or("both"),
                params.max_results.unwrap_or(100),
                params.include_context.unwrap_or(true),
                params.path.as_deref(),
                params.vault_id.as_deref(),
            )
            .await;
        json_result(result)
    }

    #[tool(description = "Read a note from the Obsidian vault. With include_line_map, returns per-line content and frontmatter/body sections for precise range edits.")]
    async fn read_obsidian_note(
        &self,
        params: Parameters<ReadNoteParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let backend = match self.vault_backend() {
            Ok(backend) => backend,
            Err(envelope) => return json_result(envelope),
        };
        let params = params.0;
        let result = backend
            .read_note(
                &params.path,
                params.include_line_map.unwrap_or(false),
                params.vault_id.as_deref(),
            )
            .await;
        json_result(result)
    }

    #[tool(description = "Create a new note in the Obsidian vault.")]
    async fn create_obsidian_note(
        &self,
        params: Parameters<CreateNoteParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let backend = match self.vault_backend() {
            Ok(backend) => backend,
            Err(envelope) => return json_result(envelope),
        };
        let params = params.0;
        let result = backend
            .create_note(&params.path, &params.content, params.vault_id.as_deref())
            .await;
        json_result(result)
    }

    #[tool(description = "Update an existing note. Modes: full_file (content), frontmatter_only (frontmatter_changes), append_only (append_content), range_based (replacement_content + range_start_line + range_start_char; read with include_line_map first), editor_based (editor_method plus method-specific parameters).")]
    async fn update_obsidian_note(
        &self,
        params: Parameters<UpdateNoteParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let backend = match self.vault_backend() {
            Ok(backend) => backend,
            Err(envelope) => return json_result(envelope),
        };
        let params = params.0;
        let request = UpdateNoteRequest {
            path: params.path,
            editing_mode: normalize_editing_mode(
                params.editing_mode.as_deref().unwrap_or("full_file"),
            ),
            content: params.content,
            frontmatter_changes: params.frontmatter_changes,
            append_content: params.append_content,
            replacement_content: params.replacement_content,
            range_start_line: params.range_start_line,
            range_start_char: params.range_start_char,
            range_end_line: params.range_end_line,
            range_end_char: params.range_end_char,
            editor_method: params.editor_method,
            extra: params.extra,
            vault_id: params.vault_id,
        };
        json_result(backend.update_note(request).await)
    }

    #[tool(description = "List all available Obsidian vaults.")]
    async fn list_obsidian_vaults(&self) -> Result<CallToolResult, ErrorData> {
        let backend = match self.vault_backend() {
            Ok(backend) => backend,
            Err(envelope) => return json_result(envelope),
        };
        json_result(backend.list_vaults().await)
    }

    #[tool(description = "Explore the folder structure of an Obsidian vault by path or query.")]
    async fn explore_vault_folders(
        &self,
        params: Parameters<ExploreFoldersParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let backend = match self.vault_backend() {
            Ok(backend) => backend,
            Err(envelope) => return json_result(envelope),
        };
        let params = params.0;
        let result = backend
            .explore_folders(
                params.path.as_deref(),
                params.query.as_deref(),
                params.format.as_deref().unwrap_or("smart"),
                params.max_depth.unwrap_or(3),
                params.vault_id.as_deref(),
            )
            .await;
        json_result(result)
    }

    #[tool(description = "Create a new note from a vault template (fuzzy-matched). When several templates match, the response carries requiresSelection plus the candidate list.")]
    async fn create_note_with_template(
        &self,
        params: Parameters<CreateWithTemplateParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let backend = match self.vault_backend() {
            Ok(backend) => backend,
            Err(envelope) => return json_result(envelope),
        };
        let params = params.0;
        let result = backend
            .create_note_with_template(
                &params.request_type,
                &params.file_name,
                params.content.as_deref().unwrap_or(""),
                params.target_folder.as_deref().unwrap_or(""),
                params.vault_id.as_deref(),
            )
            .await;
        json_result(result)
    }

    #[tool(description = "Delete or rename notes in the Obsidian vault.")]
    async fn manage_obsidian_notes(
        &self,
        params: Parameters<ManageNotesParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let backend = match self.vault_backend() {
            Ok(backend) => backend,
            Err(envelope) => return json_result(envelope),
        };
        let params = params.0;
        let result = backend
            .manage_note(
                &params.operation,
                &params.path,
                params.new_path.as_deref(),
                params.vault_id.as_deref(),
            )
            .await;
        json_result(result)
    }

    #[tool(description = "Create, rename/move, or delete folders in the Obsidian vault.")]
    async fn manage_obsidian_folders(
        &self,
        params: Parameters<ManageFoldersParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let backend = match self.vault_backend() {
            Ok(backend) => backend,
            Err(envelope) => return json_result(envelope),
        };
        let params = params.0;
        let result = backend
            .manage_folder(
                &params.operation,
                &params.folder_path,
                params.new_folder_path.as_deref(),
                params.vault_id.as_deref(),
            )
            .await;
        json_result(result)
    }

    /// Status payload backing the `mcp://status` resource.
    pub async fn status_snapshot(&self) -> Value {
        let graphiti = if self.rpc_mode {
            "rpc-mode"
        } else if self.graph.read().await.is_some() {
            "ok"
        } else {
            "disconnected"
        };
        json!({
            "graphiti": graphiti,
            "obsidian": if self.backend.is_some() { "ok" } else { "disconnected" },
            "database": self.config.database_type,
        })
    }
}

#[tool_handler]
impl rmcp::ServerHandler for BridgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "graph-bridge".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "Bridge between an Obsidian vault and a temporal knowledge graph: memory \
                 tools operate on the graph, vault tools operate on the connected editor."
                    .into(),
            ),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        let resource = RawResource {
            uri: STATUS_RESOURCE_URI.to_string(),
            name: "Bridge Status".to_string(),
            title: None,
            description: Some(
                "Health of the graph and editor connections for this process".to_string(),
            ),
            mime_type: Some("application/json".to_string()),
            size: None,
            icons: None,
            meta: None,
        };
        Ok(ListResourcesResult {
            resources: vec![resource.no_annotation()],
            next_cursor: None,
            meta: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        if request.uri != STATUS_RESOURCE_URI {
            return Err(ErrorData::resource_not_found(
                format!("Unknown resource URI: {}", request.uri),
                None,
            ));
        }
        let status = self.status_snapshot().await;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(
                status.to_string(),
                STATUS_RESOURCE_URI,
            )],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_ingest::graph::memory::InMemoryGraph;

    fn test_config() -> Arc<BridgeConfig> {
        Arc::new(BridgeConfig {
            default_namespace: "books".to_string(),
            namespace_strategy: "vault".to_string(),
            available_namespaces: vec!["work".to_string()],
            database_type: "neo4j".to_string(),
            ..Default::default()
        })
    }

    async fn ready_server() -> (BridgeServer, Arc<InMemoryGraph>) {
        let (server, slot) = BridgeServer::new(test_config(), None, None, false);
        let graph = Arc::new(InMemoryGraph::new());
        slot.install(graph.clone()).await;
        (server, graph)
    }

    fn text_of(result: &CallToolResult) -> Value {
        let content = result.content[0].raw.as_text().expect("text content");
        serde_json::from_str(&content.text).unwrap()
    }

    #[tokio::test]
    async fn add_memory_queues_episode() {
        let (server, graph) = ready_server().await;

        let result = server
            .add_memory(Parameters(AddMemoryParams {
                name: Some("Meeting".to_string()),
                content: "Alice met Bob".to_string(),
                source: None,
                source_description: None,
                group_id: Some("g1".to_string()),
                uuid: None,
            }))
            .await
            .unwrap();
        let value = text_of(&result);
        assert_eq!(value["success"], true);
        assert!(value["message"].as_str().unwrap().contains("queued (position: 1)"));

        // Drain: the queued episode lands in the graph.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let episodes = graph.recent_episodes(&["g1".to_string()], 10).await.unwrap();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].name, "Meeting");
    }

    #[tokio::test]
    async fn add_memory_defaults_group_to_namespace() {
        let (server, graph) = ready_server().await;
        server
            .add_memory(Parameters(AddMemoryParams {
                name: None,
                content: "Solo Note".to_string(),
                source: None,
                source_description: None,
                group_id: None,
                uuid: None,
            }))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let episodes = graph.recent_episodes(&["books".to_string()], 10).await.unwrap();
        assert_eq!(episodes.len(), 1);
        assert!(episodes[0].name.starts_with("Episode_"));
    }

    #[tokio::test]
    async fn conversation_memory_formats_messages() {
        let (server, graph) = ready_server().await;
        let result = server
            .add_conversation_memory(Parameters(AddConversationParams {
                name: None,
                conversation: vec![
                    ConversationMessage {
                        role: "user".to_string(),
                        content: "hello".to_string(),
                        timestamp: Some("2030-01-01T00:00:00Z".to_string()),
                    },
                    ConversationMessage {
                        role: "assistant".to_string(),
                        content: "hi".to_string(),
                        timestamp: None,
                    },
                ],
                group_id: None,
                source_description: None,
            }))
            .await
            .unwrap();
        let value = text_of(&result);
        assert_eq!(value["success"], true);
        assert_eq!(value["message_count"], 2);

        let episodes = graph.recent_episodes(&[], 10).await.unwrap();
        assert!(episodes[0].body.starts_with("[2030-01-01T00:00:00Z] user: hello\n"));
    }

    #[tokio::test]
    async fn rpc_mode_short_circuits_memory_tools() {
        let (server, _slot) = BridgeServer::new(test_config(), None, None, true);
        let result = server.clear_graph().await.unwrap();
        let value = text_of(&result);
        assert_eq!(value["success"], false);
        assert!(value["error"].as_str().unwrap().contains("host process"));
    }

    #[tokio::test]
    async fn initialization_timeout_reports_in_progress() {
        // Never install a graph; shrink the wait by marking failed.
        let (server, slot) = BridgeServer::new(test_config(), None, None, false);
        slot.mark_failed();
        let result = server.clear_graph().await.unwrap();
        let value = text_of(&result);
        assert_eq!(value["success"], false);
        assert!(value["error"].as_str().unwrap().contains("initialization"));
    }

    #[tokio::test]
    async fn list_group_ids_unions_and_sorts() {
        let mut config = (*test_config()).clone();
        config.folder_namespace_mappings = vec![bridge_config::FolderMapping {
            folder_path: "Projects".to_string(),
            group_id: "p25".to_string(),
            saga_grouping: None,
            saga_property_key: None,
            custom_extraction_instructions: None,
        }];
        let (server, slot) = BridgeServer::new(Arc::new(config), None, None, false);
        slot.install(Arc::new(InMemoryGraph::new())).await;

        let value = text_of(&server.list_group_ids().await.unwrap());
        assert_eq!(value["group_ids"], json!(["books", "p25", "work"]));
        assert_eq!(value["current_default"], "books");
    }

    #[tokio::test]
    async fn vault_tools_error_without_backend() {
        let (server, _slot) =
            BridgeServer::new(test_config(), None, Some("port conflict".to_string()), false);
        let value = text_of(&server.list_obsidian_vaults().await.unwrap());
        assert_eq!(value["success"], false);
        assert_eq!(value["details"], "port conflict");
    }

    #[tokio::test]
    async fn status_resource_reflects_roles() {
        let (server, _slot) = BridgeServer::new(test_config(), None, None, true);
        let status = server.status_snapshot().await;
        assert_eq!(status["graphiti"], "rpc-mode");
        assert_eq!(status["obsidian"], "disconnected");
        assert_eq!(status["database"], "neo4j");

        let (server, slot) = BridgeServer::new(test_config(), None, None, false);
        assert_eq!(server.status_snapshot().await["graphiti"], "disconnected");
        slot.install(Arc::new(InMemoryGraph::new())).await;
        assert_eq!(server.status_snapshot().await["graphiti"], "ok");
    }

    #[test]
    fn editing_mode_aliases_normalize() {
        assert_eq!(normalize_editing_mode("frontmatter"), "frontmatter_only");
        assert_eq!(normalize_editing_mode("append"), "append_only");
        assert_eq!(normalize_editing_mode("range"), "range_based");
        assert_eq!(normalize_editing_mode("editor"), "editor_based");
        assert_eq!(normalize_editing_mode("full"), "full_file");
        assert_eq!(normalize_editing_mode("full_file"), "full_file");
    }

    #[test]
    fn update_params_accept_camel_and_operation_aliases() {
        let params: UpdateNoteParams = serde_json::from_value(json!({
            "path": "x.md",
            "operation": "append",
            "appendContent": "more",
            "vaultId": "A",
        }))
        .unwrap();
        assert_eq!(params.editing_mode.as_deref(), Some("append"));
        assert_eq!(params.append_content.as_deref(), Some("more"));
        assert_eq!(params.vault_id.as_deref(), Some("A"));
    }
}
