//! Episode ingestion pipeline.
//!
//! Turns notes into timestamped episodes for the temporal knowledge graph:
//! namespace and saga resolution, the user-authored ontology, episode
//! assembly, and per-group serialized submission. The graph engine itself is
//! an external collaborator behind [`graph::GraphClient`].

pub mod episode;
pub mod failure;
pub mod graph;
pub mod namespace;
pub mod pipeline;
pub mod queue;
pub mod schema;

pub use episode::{EpisodeResult, EpisodeStatus, ResultMetrics};
pub use graph::{
    EpisodeReceipt, EpisodeSource, EpisodeSubmission, FactQuery, GraphClient, GraphError,
    NodeQuery, ProviderFactory,
};
pub use pipeline::{NotePipeline, PipelineError};
pub use queue::EpisodeQueues;
pub use schema::{EdgeType, EntityType, FieldKind, FieldSpec, Schema, SchemaLoader};
