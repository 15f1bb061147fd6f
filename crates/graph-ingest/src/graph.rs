//! The graph client boundary.
//!
//! Entity extraction, embedding, and storage happen in the graph engine; this
//! module only defines the submission/search surface the bridge drives, plus
//! an in-memory implementation for tests and local runs. Only the elected
//! host process ever owns a client.

pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bridge_config::BridgeConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::schema::{EdgeType, EntityType};

/// How the episode body should be interpreted by the extraction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeSource {
    Text,
    Message,
    Json,
}

impl EpisodeSource {
    /// Lenient parse used for MCP tool input; anything unknown is text.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "message" => EpisodeSource::Message,
            "json" => EpisodeSource::Json,
            _ => EpisodeSource::Text,
        }
    }
}

/// One episode handed to the graph.
///
/// `group_id` is `None` when the backend does not accept per-episode group
/// ids (see [`GraphClient::supports_group_ids`]). Empty `entity_types` means
/// a generic (untyped) extraction.
#[derive(Debug, Clone)]
pub struct EpisodeSubmission {
    pub name: String,
    pub body: String,
    pub source: EpisodeSource,
    pub source_description: String,
    pub reference_time: DateTime<Utc>,
    pub group_id: Option<String>,
    pub uuid: Option<String>,
    pub previous_episode_uuids: Vec<String>,
    pub saga_name: Option<String>,
    pub saga_previous_episode_uuid: Option<String>,
    pub custom_extraction_instructions: Option<String>,
    pub entity_types: Vec<EntityType>,
    pub edge_types: Vec<EdgeType>,
    pub allowed_edges_by_pair: BTreeMap<(String, String), Vec<String>>,
}

impl EpisodeSubmission {
    pub fn text(name: impl Into<String>, body: impl Into<String>) -> Self {
        EpisodeSubmission {
            name: name.into(),
            body: body.into(),
            source: EpisodeSource::Text,
            source_description: String::new(),
            reference_time: Utc::now(),
            group_id: None,
            uuid: None,
            previous_episode_uuids: Vec::new(),
            saga_name: None,
            saga_previous_episode_uuid: None,
            custom_extraction_instructions: None,
            entity_types: Vec::new(),
            edge_types: Vec::new(),
            allowed_edges_by_pair: BTreeMap::new(),
        }
    }
}

/// What the graph reports back after accepting an episode.
#[derive(Debug, Clone, Default)]
pub struct EpisodeReceipt {
    pub episode_uuid: Option<String>,
    pub entities_count: usize,
    pub relationships_count: usize,
}

/// A node hit from hybrid search.
#[derive(Debug, Clone, Serialize)]
pub struct NodeHit {
    pub uuid: String,
    pub name: String,
    pub summary: String,
    pub labels: Vec<String>,
    pub group_id: String,
    pub created_at: DateTime<Utc>,
    pub attributes: Value,
}

/// An edge/fact hit from hybrid search.
#[derive(Debug, Clone, Serialize)]
pub struct FactHit {
    pub uuid: String,
    pub fact: String,
    pub source_node_uuid: String,
    pub target_node_uuid: String,
    pub group_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_at: Option<DateTime<Utc>>,
}

/// A stored episode, as returned by [`GraphClient::recent_episodes`].
#[derive(Debug, Clone, Serialize)]
pub struct StoredEpisode {
    pub uuid: String,
    pub name: String,
    pub body: String,
    pub source_description: String,
    pub group_id: String,
    pub reference_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saga_name: Option<String>,
}

/// Parameters for node search.
#[derive(Debug, Clone, Default)]
pub struct NodeQuery {
    pub query: String,
    pub limit: usize,
    pub group_ids: Vec<String>,
    /// Bias ranking toward graph proximity to this node when set.
    pub center_node_uuid: Option<String>,
    /// Restrict results to these node labels.
    pub entity_types: Vec<String>,
}

/// Parameters for fact (edge) search.
#[derive(Debug, Clone, Default)]
pub struct FactQuery {
    pub query: String,
    pub limit: usize,
    pub group_ids: Vec<String>,
    pub center_node_uuid: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The provider refused or failed; message preserved verbatim for
    /// rate-limit and infrastructure classification.
    #[error("{0}")]
    Provider(String),
    #[error("graph backend unavailable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// The narrow surface the bridge drives on the graph engine.
#[async_trait]
pub trait GraphClient: Send + Sync {
    async fn add_episode(&self, episode: EpisodeSubmission) -> Result<EpisodeReceipt, GraphError>;

    async fn search_nodes(&self, query: NodeQuery) -> Result<Vec<NodeHit>, GraphError>;

    async fn search_facts(&self, query: FactQuery) -> Result<Vec<FactHit>, GraphError>;

    async fn recent_episodes(
        &self,
        group_ids: &[String],
        last_n: usize,
    ) -> Result<Vec<StoredEpisode>, GraphError>;

    async fn remove_episode(&self, episode_uuid: &str) -> Result<(), GraphError>;

    async fn delete_edge(&self, edge_uuid: &str) -> Result<(), GraphError>;

    /// Edges whose fact mentions the entity, optionally filtered by a
    /// substring on the fact text.
    async fn edges_for_entity(
        &self,
        entity_name: &str,
        edge_type: Option<&str>,
    ) -> Result<Vec<FactHit>, GraphError>;

    async fn clear(&self) -> Result<(), GraphError>;

    /// Whether the backing store accepts per-episode group ids (Neo4j-class
    /// backends do, FalkorDB-class ones do not).
    fn supports_group_ids(&self) -> bool;

    async fn close(&self) -> Result<(), GraphError>;
}

/// Reranker warm-up outcome reported in the daemon's ready handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RerankerStatus {
    pub loaded: bool,
}

/// Creates graph clients and warms heavy models.
///
/// Concrete provider wiring (LLM, embedder, reranker, database drivers)
/// lives outside this repo; the bridge only ever sees this trait.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn connect(&self, config: &BridgeConfig) -> Result<Arc<dyn GraphClient>, GraphError>;

    /// Warm the cross-encoder once, offline. Never fetches models.
    fn warm_reranker(&self) -> RerankerStatus {
        RerankerStatus { loaded: false }
    }
}
