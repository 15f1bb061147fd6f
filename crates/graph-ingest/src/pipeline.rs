//! Single-note ingestion.
//!
//! Reads a note, resolves its namespace and saga, assembles an episode, and
//! submits it to the graph. The custom-ontology path falls back to a generic
//! text episode on any failure so a broken schema never loses content.

use std::path::Path;
use std::sync::Arc;

use bridge_config::BridgeConfig;
use chrono::Utc;
use obsidian_fs::{
    extract_frontmatter, extract_plain_text, load_sync_records, plugin_data_path, read_note,
    resolve_note_path, validate_note_file,
};

use crate::episode::{
    EpisodeResult, EpisodeStatus, ResultMetrics, extract_reference_time,
    merge_frontmatter_into_body, resolve_source_description,
};
use crate::failure::{FailureKind, classify_provider_error};
use crate::graph::{EpisodeSource, EpisodeSubmission, GraphClient, GraphError};
use crate::namespace::{
    find_previous_in_saga, resolve_custom_instructions, resolve_namespace, resolve_saga,
};
use crate::schema::{Schema, load_schema_cached};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Provider or backend error with no special classification; the original
    /// message surfaces verbatim.
    #[error("{0}")]
    Backend(String),
}

/// One-note pipeline bound to a config and a graph client.
pub struct NotePipeline {
    config: Arc<BridgeConfig>,
    graph: Arc<dyn GraphClient>,
    schema: Option<Arc<Schema>>,
}

impl NotePipeline {
    /// Build a pipeline. When custom ontology is on, the schema is loaded
    /// from the plugin's `data.json` (explicit override path respected); a
    /// load failure logs a warning and degrades to generic episodes.
    pub fn new(
        config: Arc<BridgeConfig>,
        graph: Arc<dyn GraphClient>,
        explicit_data_path: Option<&Path>,
    ) -> Self {
        let schema = if config.use_custom_ontology {
            match &config.vault_path {
                Some(vault) => {
                    let data_path = plugin_data_path(vault, explicit_data_path);
                    match load_schema_cached(&data_path) {
                        Ok(schema) => Some(schema),
                        Err(err) => {
                            tracing::warn!(
                                "custom ontology enabled but schema load failed ({err}); \
                                 falling back to generic episodes"
                            );
                            None
                        }
                    }
                }
                None => {
                    tracing::warn!("custom ontology enabled without a vault path");
                    None
                }
            }
        } else {
            None
        };
        NotePipeline { config, graph, schema }
    }

    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }

    /// Process one note. `Ok(None)` means the note was deliberately skipped
    /// (missing file or `private: true`); classified failures come back as
    /// result envelopes, anything else as [`PipelineError`].
    pub async fn process_note(
        &self,
        note_path: &str,
    ) -> Result<Option<EpisodeResult>, PipelineError> {
        let start_time = Utc::now();

        let full_path = resolve_note_path(note_path, self.config.vault_path.as_deref());
        if let Err(err) = validate_note_file(&full_path) {
            tracing::warn!("skipping invalid note file: {err}");
            return Ok(None);
        }
        let raw = match read_note(&full_path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!("skipping unreadable note: {err}");
                return Ok(None);
            }
        };

        let (frontmatter, _) = extract_frontmatter(&raw);
        let clean_text = extract_plain_text(&raw);
        let note_name = Path::new(note_path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| note_path.to_string());

        // Private notes never leave the vault.
        if frontmatter.get("private").and_then(|v| v.as_bool()).unwrap_or(false) {
            tracing::debug!("skipping private note: {note_name}");
            return Ok(None);
        }

        let reference_time = extract_reference_time(&frontmatter);
        let group_id = resolve_namespace(note_path, &frontmatter, &self.config);
        let custom_instructions = resolve_custom_instructions(note_path, &self.config);

        let saga_name = resolve_saga(note_path, &frontmatter, &group_id, &self.config);
        let saga_previous_uuid = match (&saga_name, &self.config.vault_path) {
            (Some(saga), Some(vault)) => {
                let records = load_sync_records(vault);
                find_previous_in_saga(saga, &records)
            }
            _ => None,
        };

        let body = merge_frontmatter_into_body(&frontmatter, &clean_text);
        let source_description =
            resolve_source_description(&frontmatter, self.config.source_description.as_deref());

        let submission = EpisodeSubmission {
            name: note_name.clone(),
            body,
            source: EpisodeSource::Text,
            source_description,
            reference_time,
            group_id: self
                .graph
                .supports_group_ids()
                .then(|| group_id.clone()),
            uuid: None,
            previous_episode_uuids: self.config.previous_episode_uuids.clone(),
            saga_name: saga_name.clone(),
            saga_previous_episode_uuid: saga_previous_uuid,
            custom_extraction_instructions: custom_instructions,
            entity_types: Vec::new(),
            edge_types: Vec::new(),
            allowed_edges_by_pair: Default::default(),
        };

        let use_custom = self
            .schema
            .as_ref()
            .is_some_and(|schema| !schema.entity_types.is_empty());

        let outcome = if use_custom {
            let schema = self.schema.as_ref().cloned().unwrap_or_default();
            let mut typed = submission.clone();
            typed.entity_types = schema.entity_types.clone();
            typed.edge_types = schema.edge_types.clone();
            typed.allowed_edges_by_pair = schema.edge_type_map.clone();
            match self.graph.add_episode(typed).await {
                Ok(receipt) => Ok(receipt),
                Err(err) => {
                    tracing::warn!(
                        "custom entity episode creation failed ({err}), \
                         falling back to generic episode"
                    );
                    self.graph.add_episode(submission.clone()).await
                }
            }
        } else {
            self.graph.add_episode(submission).await
        };

        let end_time = Utc::now();
        let duration = (end_time - start_time).num_milliseconds() as f64 / 1000.0;

        match outcome {
            Ok(receipt) => Ok(Some(EpisodeResult {
                status: EpisodeStatus::Success,
                note_path: note_path.to_string(),
                note_name,
                namespace: Some(group_id),
                saga_name,
                episode_uuid: receipt.episode_uuid,
                reference_time: Some(reference_time.to_rfc3339()),
                processing_duration_seconds: duration,
                start_time: start_time.to_rfc3339(),
                end_time: end_time.to_rfc3339(),
                metrics: Some(ResultMetrics {
                    entities_count: receipt.entities_count,
                    relationships_count: receipt.relationships_count,
                    content_length: clean_text.len(),
                    metadata_fields: frontmatter.len(),
                }),
                error: None,
                provider_message: None,
                retry_after: None,
                reset_time: None,
                cancel_sync: None,
            })),
            Err(GraphError::Provider(message)) => {
                match classify_provider_error(&message) {
                    FailureKind::RateLimited { retry_after_secs, reset_time, provider_message } => {
                        Ok(Some(EpisodeResult {
                            status: EpisodeStatus::RateLimited,
                            note_path: note_path.to_string(),
                            note_name,
                            namespace: Some(group_id),
                            saga_name,
                            episode_uuid: None,
                            reference_time: Some(reference_time.to_rfc3339()),
                            processing_duration_seconds: duration,
                            start_time: start_time.to_rfc3339(),
                            end_time: end_time.to_rfc3339(),
                            metrics: None,
                            error: Some(
                                "API rate limit exceeded - sync will pause until reset".to_string(),
                            ),
                            provider_message: Some(provider_message),
                            retry_after: Some(retry_after_secs),
                            reset_time,
                            cancel_sync: None,
                        }))
                    }
                    FailureKind::Infrastructure { provider_message } => Ok(Some(EpisodeResult {
                        status: EpisodeStatus::InfrastructureError,
                        note_path: note_path.to_string(),
                        note_name,
                        namespace: Some(group_id),
                        saga_name,
                        episode_uuid: None,
                        reference_time: Some(reference_time.to_rfc3339()),
                        processing_duration_seconds: duration,
                        start_time: start_time.to_rfc3339(),
                        end_time: end_time.to_rfc3339(),
                        metrics: None,
                        error: Some(
                            "Service provider infrastructure issue - please try again later"
                                .to_string(),
                        ),
                        provider_message: Some(provider_message),
                        retry_after: None,
                        reset_time: None,
                        cancel_sync: Some(true),
                    })),
                    FailureKind::Other => Err(PipelineError::Backend(message)),
                }
            }
            Err(other) => Err(PipelineError::Backend(other.to_string())),
        }
    }
}
