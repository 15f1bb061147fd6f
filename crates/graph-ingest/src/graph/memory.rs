//! In-memory graph store.
//!
//! Backs tests and local development runs with the same surface as a real
//! graph engine. "Extraction" is a word split of the episode body: every
//! capitalized word becomes a node, adjacent nodes become mention edges.
//! Good enough to exercise ordering, search, and deletion semantics.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bridge_config::BridgeConfig;
use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    EpisodeReceipt, EpisodeSubmission, FactHit, FactQuery, GraphClient, GraphError, NodeHit,
    NodeQuery, ProviderFactory, RerankerStatus, StoredEpisode,
};

#[derive(Debug, Clone)]
struct StoredNode {
    hit: NodeHit,
}

#[derive(Debug, Clone)]
struct StoredEdge {
    hit: FactHit,
}

#[derive(Debug, Default)]
struct MemoryStore {
    episodes: Vec<StoredEpisode>,
    nodes: HashMap<String, StoredNode>,
    edges: HashMap<String, StoredEdge>,
}

/// In-memory [`GraphClient`].
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    store: RwLock<MemoryStore>,
    group_ids_supported: bool,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        InMemoryGraph {
            store: RwLock::new(MemoryStore::default()),
            group_ids_supported: true,
        }
    }

    /// Pretend to be a backend without per-episode group ids (FalkorDB-class).
    pub fn without_group_ids() -> Self {
        InMemoryGraph {
            store: RwLock::new(MemoryStore::default()),
            group_ids_supported: false,
        }
    }

    fn extract_entities(body: &str) -> Vec<String> {
        let mut seen = Vec::new();
        for word in body.split_whitespace() {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric());
            if word.len() > 2
                && word.chars().next().is_some_and(|c| c.is_uppercase())
                && !seen.iter().any(|s| s == word)
            {
                seen.push(word.to_string());
            }
        }
        seen
    }
}

#[async_trait]
impl GraphClient for InMemoryGraph {
    async fn add_episode(&self, episode: EpisodeSubmission) -> Result<EpisodeReceipt, GraphError> {
        let mut store = self.store.write().await;
        let group_id = episode.group_id.clone().unwrap_or_default();
        let episode_uuid = episode.uuid.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

        let entities = Self::extract_entities(&episode.body);
        let allowed_labels: Vec<&str> =
            episode.entity_types.iter().map(|t| t.name.as_str()).collect();

        let mut node_uuids = Vec::new();
        for name in &entities {
            let uuid = Uuid::new_v4().to_string();
            let labels = if allowed_labels.is_empty() {
                vec!["Entity".to_string()]
            } else {
                // Cheap typing: first declared type claims every entity.
                vec![allowed_labels[0].to_string()]
            };
            store.nodes.insert(
                uuid.clone(),
                StoredNode {
                    hit: NodeHit {
                        uuid: uuid.clone(),
                        name: name.clone(),
                        summary: format!("Mentioned in {}", episode.name),
                        labels,
                        group_id: group_id.clone(),
                        created_at: Utc::now(),
                        attributes: json!({}),
                    },
                },
            );
            node_uuids.push((uuid, name.clone()));
        }

        let mut relationships = 0;
        for pair in node_uuids.windows(2) {
            let uuid = Uuid::new_v4().to_string();
            store.edges.insert(
                uuid.clone(),
                StoredEdge {
                    hit: FactHit {
                        uuid,
                        fact: format!("{} RELATES_TO {}", pair[0].1, pair[1].1),
                        source_node_uuid: pair[0].0.clone(),
                        target_node_uuid: pair[1].0.clone(),
                        group_id: group_id.clone(),
                        valid_at: Some(episode.reference_time),
                        invalid_at: None,
                    },
                },
            );
            relationships += 1;
        }

        store.episodes.push(StoredEpisode {
            uuid: episode_uuid.clone(),
            name: episode.name,
            body: episode.body,
            source_description: episode.source_description,
            group_id,
            reference_time: episode.reference_time,
            saga_name: episode.saga_name,
        });

        Ok(EpisodeReceipt {
            episode_uuid: Some(episode_uuid),
            entities_count: entities.len(),
            relationships_count: relationships,
        })
    }

    async fn search_nodes(&self, query: NodeQuery) -> Result<Vec<NodeHit>, GraphError> {
        let store = self.store.read().await;
        let needle = query.query.to_lowercase();
        let mut hits: Vec<NodeHit> = store
            .nodes
            .values()
            .map(|n| n.hit.clone())
            .filter(|hit| {
                (query.group_ids.is_empty() || query.group_ids.contains(&hit.group_id))
                    && (query.entity_types.is_empty()
                        || hit.labels.iter().any(|l| query.entity_types.contains(l)))
                    && (needle.is_empty() || hit.name.to_lowercase().contains(&needle))
            })
            .collect();
        // Proximity bias: direct neighbors of the center node first.
        if let Some(center) = &query.center_node_uuid {
            let neighbors: Vec<&str> = store
                .edges
                .values()
                .filter_map(|e| {
                    if &e.hit.source_node_uuid == center {
                        Some(e.hit.target_node_uuid.as_str())
                    } else if &e.hit.target_node_uuid == center {
                        Some(e.hit.source_node_uuid.as_str())
                    } else {
                        None
                    }
                })
                .collect();
            hits.sort_by_key(|hit| !neighbors.contains(&hit.uuid.as_str()));
        }
        hits.truncate(query.limit.max(1));
        Ok(hits)
    }

    async fn search_facts(&self, query: FactQuery) -> Result<Vec<FactHit>, GraphError> {
        let store = self.store.read().await;
        let needle = query.query.to_lowercase();
        let mut hits: Vec<FactHit> = store
            .edges
            .values()
            .map(|e| e.hit.clone())
            .filter(|hit| {
                (query.group_ids.is_empty() || query.group_ids.contains(&hit.group_id))
                    && (needle.is_empty() || hit.fact.to_lowercase().contains(&needle))
            })
            .collect();
        if let Some(center) = &query.center_node_uuid {
            hits.sort_by_key(|hit| {
                !(hit.source_node_uuid == *center || hit.target_node_uuid == *center)
            });
        }
        hits.truncate(query.limit.max(1));
        Ok(hits)
    }

    async fn recent_episodes(
        &self,
        group_ids: &[String],
        last_n: usize,
    ) -> Result<Vec<StoredEpisode>, GraphError> {
        let store = self.store.read().await;
        let mut episodes: Vec<StoredEpisode> = store
            .episodes
            .iter()
            .filter(|e| group_ids.is_empty() || group_ids.contains(&e.group_id))
            .cloned()
            .collect();
        episodes.sort_by(|a, b| b.reference_time.cmp(&a.reference_time));
        episodes.truncate(last_n);
        Ok(episodes)
    }

    async fn remove_episode(&self, episode_uuid: &str) -> Result<(), GraphError> {
        let mut store = self.store.write().await;
        let before = store.episodes.len();
        store.episodes.retain(|e| e.uuid != episode_uuid);
        if store.episodes.len() == before {
            return Err(GraphError::NotFound(episode_uuid.to_string()));
        }
        Ok(())
    }

    async fn delete_edge(&self, edge_uuid: &str) -> Result<(), GraphError> {
        let mut store = self.store.write().await;
        store
            .edges
            .remove(edge_uuid)
            .map(|_| ())
            .ok_or_else(|| GraphError::NotFound(edge_uuid.to_string()))
    }

    async fn edges_for_entity(
        &self,
        entity_name: &str,
        edge_type: Option<&str>,
    ) -> Result<Vec<FactHit>, GraphError> {
        let store = self.store.read().await;
        let name = entity_name.to_lowercase();
        let filter = edge_type.map(str::to_lowercase);
        Ok(store
            .edges
            .values()
            .map(|e| e.hit.clone())
            .filter(|hit| hit.fact.to_lowercase().contains(&name))
            .filter(|hit| {
                filter
                    .as_ref()
                    .is_none_or(|f| hit.fact.to_lowercase().contains(f))
            })
            .collect())
    }

    async fn clear(&self) -> Result<(), GraphError> {
        let mut store = self.store.write().await;
        *store = MemoryStore::default();
        Ok(())
    }

    fn supports_group_ids(&self) -> bool {
        self.group_ids_supported
    }

    async fn close(&self) -> Result<(), GraphError> {
        Ok(())
    }
}

/// Factory producing [`InMemoryGraph`] clients.
///
/// The production factory (real drivers, provider SDKs) is supplied by the
/// embedding application; this one keeps binaries and tests self-contained.
#[derive(Debug, Default)]
pub struct InMemoryFactory;

#[async_trait]
impl ProviderFactory for InMemoryFactory {
    async fn connect(&self, config: &BridgeConfig) -> Result<Arc<dyn GraphClient>, GraphError> {
        let client: Arc<dyn GraphClient> = if config.database_type == "falkordb" {
            Arc::new(InMemoryGraph::without_group_ids())
        } else {
            Arc::new(InMemoryGraph::new())
        };
        Ok(client)
    }

    fn warm_reranker(&self) -> RerankerStatus {
        // Nothing heavy to load locally; report the reranker as absent.
        RerankerStatus { loaded: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_retrieve_episode() {
        let graph = InMemoryGraph::new();
        let mut episode = EpisodeSubmission::text("Meeting", "Alice met Bob at Acme");
        episode.group_id = Some("g1".to_string());
        let receipt = graph.add_episode(episode).await.unwrap();
        assert!(receipt.episode_uuid.is_some());
        assert!(receipt.entities_count >= 2);

        let episodes = graph.recent_episodes(&["g1".to_string()], 10).await.unwrap();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].name, "Meeting");
    }

    #[tokio::test]
    async fn node_search_filters_by_group_and_label() {
        let graph = InMemoryGraph::new();
        let mut episode = EpisodeSubmission::text("n", "Alice knows Bob");
        episode.group_id = Some("g1".to_string());
        graph.add_episode(episode).await.unwrap();

        let hits = graph
            .search_nodes(NodeQuery {
                query: "alice".to_string(),
                limit: 10,
                group_ids: vec!["g1".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Alice");

        let none = graph
            .search_nodes(NodeQuery {
                query: "alice".to_string(),
                limit: 10,
                group_ids: vec!["other".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn remove_episode_then_not_found() {
        let graph = InMemoryGraph::new();
        let receipt = graph
            .add_episode(EpisodeSubmission::text("n", "Solo"))
            .await
            .unwrap();
        let uuid = receipt.episode_uuid.unwrap();
        graph.remove_episode(&uuid).await.unwrap();
        assert!(matches!(
            graph.remove_episode(&uuid).await,
            Err(GraphError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn clear_wipes_everything() {
        let graph = InMemoryGraph::new();
        graph
            .add_episode(EpisodeSubmission::text("n", "Alice met Bob"))
            .await
            .unwrap();
        graph.clear().await.unwrap();
        assert!(graph.recent_episodes(&[], 10).await.unwrap().is_empty());
        assert!(graph
            .search_nodes(NodeQuery { query: String::new(), limit: 10, ..Default::default() })
            .await
            .unwrap()
            .is_empty());
    }
}
