//! Storage and provider trait contracts shared across the engine.

use crate::{
    AuditEvent, AuditListOptions, Chunk, GraphEdge, GraphNode, NodeType, StorageError, Triple,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One hit from a vector kNN search: id, stored text, cosine similarity.
#[derive(Debug, Clone)]
pub struct VecSearchHit {
    pub id: String,
    pub text: String,
    pub score: f64,
}

/// Vector store capability set. A "table" groups embeddings of one kind (`chunk`,
/// `entity`, `summary`, `unknown`, ...); `VectorStorage` implementations treat the table
/// name as an opaque partition key alongside `memory_group`.
#[async_trait]
pub trait VectorStorage: Send + Sync {
    /// Upsert one embedding; replaces `text` and `vector` if the id already exists.
    /// Errors with [`StorageError::DimensionMismatch`] if `vector.len()` does not match
    /// the table's declared dimension.
    async fn save_embedding(
        &self,
        table: &str,
        id: &str,
        text: &str,
        vector: &[f32],
        memory_group: &str,
    ) -> Result<(), StorageError>;

    /// Top-k nearest neighbors by cosine similarity, descending, restricted to `memory_group`.
    async fn query(
        &self,
        table: &str,
        vector: &[f32],
        top_k: usize,
        memory_group: &str,
    ) -> Result<Vec<VecSearchHit>, StorageError>;

    /// Fetch one stored embedding vector, if present.
    async fn get_embedding(
        &self,
        table: &str,
        id: &str,
        memory_group: &str,
    ) -> Result<Option<Vec<f32>>, StorageError>;

    /// Fetch several stored embedding vectors by id.
    async fn get_embeddings(
        &self,
        table: &str,
        ids: &[String],
        memory_group: &str,
    ) -> Result<std::collections::HashMap<String, Vec<f32>>, StorageError>;

    /// Delete one embedding row, if present.
    async fn delete_embedding(
        &self,
        table: &str,
        id: &str,
        memory_group: &str,
    ) -> Result<(), StorageError>;
}

/// Graph store capability set: nodes, edges, traversal, and the metrics Memify mutates.
#[async_trait]
pub trait GraphStorage: Send + Sync {
    /// MERGE-upsert nodes by id.
    async fn add_nodes(&self, nodes: &[GraphNode]) -> Result<(), StorageError>;

    /// MERGE-upsert edges by `(source, target, edge_type, memory_group)`.
    async fn add_edges(&self, edges: &[GraphEdge]) -> Result<(), StorageError>;

    /// All triples where either endpoint is in `node_ids` (one-hop neighborhood).
    async fn get_triples(
        &self,
        node_ids: &[String],
        memory_group: &str,
    ) -> Result<Vec<Triple>, StorageError>;

    async fn get_node(&self, id: &str, memory_group: &str) -> Result<Option<GraphNode>, StorageError>;

    async fn get_nodes_by_type(
        &self,
        node_type: NodeType,
        memory_group: &str,
    ) -> Result<Vec<GraphNode>, StorageError>;

    async fn get_nodes_by_incoming_edge(
        &self,
        target: &str,
        edge_type: &str,
        memory_group: &str,
    ) -> Result<Vec<GraphNode>, StorageError>;

    async fn get_edges_by_node(
        &self,
        node_id: &str,
        memory_group: &str,
    ) -> Result<Vec<GraphEdge>, StorageError>;

    /// Set absolute weight/confidence on one edge.
    async fn update_edge_metrics(
        &self,
        source: &str,
        target: &str,
        edge_type: &str,
        memory_group: &str,
        weight: f32,
        confidence: f32,
    ) -> Result<(), StorageError>;

    async fn delete_edge(
        &self,
        source: &str,
        target: &str,
        edge_type: &str,
        memory_group: &str,
    ) -> Result<(), StorageError>;

    /// Delete a node; `detach` also removes its incident edges.
    async fn delete_node(&self, id: &str, memory_group: &str, detach: bool) -> Result<(), StorageError>;

    /// Nodes with no incident edges whose creation time is older than `grace_period`.
    async fn get_orphan_nodes(
        &self,
        memory_group: &str,
        grace_period: Duration,
    ) -> Result<Vec<GraphNode>, StorageError>;
}

/// Content-hash based dedup / provenance lookups for Data/Document/Chunk rows.
#[async_trait]
pub trait ContentStorage: Send + Sync {
    async fn find_data_by_hash(
        &self,
        content_hash: &str,
        memory_group: &str,
    ) -> Result<Option<crate::Data>, StorageError>;

    async fn insert_data(&self, data: &crate::Data) -> Result<(), StorageError>;

    async fn insert_document(&self, document: &crate::Document) -> Result<(), StorageError>;

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<(), StorageError>;

    async fn get_chunks_by_ids(
        &self,
        ids: &[String],
        memory_group: &str,
    ) -> Result<Vec<Chunk>, StorageError>;
}

/// Keyword/BM25 full-text index used for FTS entity expansion.
#[async_trait]
pub trait KeywordStorage: Send + Sync {
    async fn index(&self, id: &str, text: &str, memory_group: &str) -> Result<(), StorageError>;

    async fn remove(&self, id: &str, memory_group: &str) -> Result<(), StorageError>;

    /// BM25 search restricted to `memory_group`; returns (id, score) pairs descending.
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        memory_group: &str,
    ) -> Result<Vec<(String, f64)>, StorageError>;
}

/// Everything a Cube's storage engine must provide. The primary SQLite-backed engine
/// implements all four against one shared connection; in-memory reference
/// implementations may implement a subset for isolated unit tests.
pub trait CubeStorage: VectorStorage + GraphStorage + ContentStorage + KeywordStorage {}
impl<T: VectorStorage + GraphStorage + ContentStorage + KeywordStorage> CubeStorage for T {}

use crate::TokenUsage;

/// Provider-agnostic text embedding.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text; default delegates to `embed_batch`.
    async fn embed(&self, text: &str) -> Result<(Vec<f32>, TokenUsage), crate::ProviderError> {
        let (mut vs, usage) = self.embed_batch(&[text.to_string()]).await?;
        let v = vs.pop().ok_or(crate::ProviderError::EmptyResponse)?;
        Ok((v, usage))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> Result<(Vec<Vec<f32>>, TokenUsage), crate::ProviderError>;

    /// Declared output dimension for this embedder's configured model.
    fn dimension(&self) -> u32;

    /// Light live-probe call; must report the provider's error verbatim on failure.
    async fn verify(&self) -> Result<(), crate::ProviderError>;
}

/// Provider-agnostic chat/completion call.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Generate a completion, racing the underlying call against `cancel` so a
    /// cancellation aborts the in-flight request rather than only discarding its result.
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, TokenUsage), crate::ProviderError>;

    async fn verify(&self) -> Result<(), crate::ProviderError>;
}

/// Audit event store: append-only log with optional filter/pagination.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, event: AuditEvent) -> Result<(), StorageError>;

    async fn list(&self, opts: &AuditListOptions) -> Result<Vec<AuditEvent>, StorageError>;
}
