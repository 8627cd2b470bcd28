//! Data model: Cube, Data, Document, Chunk, GraphNode, GraphEdge, permissions, tenancy.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Separator used to qualify graph node ids by memory group, since the storage engine
/// cannot express a composite uniqueness key. Renderers strip the suffix before display.
pub const NODE_ID_SEPARATOR: &str = "::";

/// Qualify a bare node id with its memory group.
pub fn qualify_node_id(base_id: &str, memory_group: &str) -> String {
    format!("{base_id}{NODE_ID_SEPARATOR}{memory_group}")
}

/// Tenant identity: the triple that scopes ownership of a Cube and everything inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId {
    pub apx_id: String,
    pub vdr_id: String,
    pub usr_id: String,
}

impl TenantId {
    pub fn new(apx_id: impl Into<String>, vdr_id: impl Into<String>, usr_id: impl Into<String>) -> Self {
        Self {
            apx_id: apx_id.into(),
            vdr_id: vdr_id.into(),
            usr_id: usr_id.into(),
        }
    }

    /// Directory segment used for per-tenant storage layout: `{apx}-{vdr}-{usr}`.
    pub fn path_segment(&self) -> String {
        format!("{}-{}-{}", self.apx_id, self.vdr_id, self.usr_id)
    }
}

/// A single limit in a permission grant: `0` unlimited, positive remaining count,
/// negative forbidden.
pub type Limit = i64;

pub const LIMIT_UNLIMITED: Limit = 0;

/// Outcome of consuming one use of a [`Limit`]: the value to persist back into the
/// permission grant, and the value to report to the caller as "remaining".
///
/// These diverge on the last permitted use of a positive limit: `to_store` is the
/// forbidden sentinel `-1` (since storing `0` would make an exhausted limit
/// indistinguishable from a configured-unlimited one on the next check), while
/// `remaining` is the caller-facing `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConsumption {
    pub to_store: Limit,
    pub remaining: Limit,
}

/// Returns `None` if `limit` is already forbidden (negative), otherwise the value to
/// store and the value to report after consuming one use.
pub fn consume_limit(limit: Limit) -> Option<LimitConsumption> {
    if limit < 0 {
        None
    } else if limit == 0 {
        Some(LimitConsumption { to_store: 0, remaining: 0 })
    } else if limit == 1 {
        Some(LimitConsumption { to_store: -1, remaining: 0 })
    } else {
        Some(LimitConsumption { to_store: limit - 1, remaining: limit - 1 })
    }
}

/// The set of limits and allow-lists enforced per Cube operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrant {
    #[serde(default)]
    pub export_limit: Limit,
    #[serde(default)]
    pub rekey_limit: Limit,
    #[serde(default)]
    pub genkey_limit: Limit,
    #[serde(default)]
    pub absorb_limit: Limit,
    #[serde(default)]
    pub memify_limit: Limit,
    #[serde(default)]
    pub query_limit: Limit,
    #[serde(default = "default_true")]
    pub allow_stats: bool,
    /// Empty means all query types are permitted.
    #[serde(default)]
    pub allowed_query_types: Vec<crate::QueryType>,
    #[serde(default)]
    pub memify_max_epochs: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl Default for PermissionGrant {
    fn default() -> Self {
        Self {
            export_limit: LIMIT_UNLIMITED,
            rekey_limit: LIMIT_UNLIMITED,
            genkey_limit: LIMIT_UNLIMITED,
            absorb_limit: LIMIT_UNLIMITED,
            memify_limit: LIMIT_UNLIMITED,
            query_limit: LIMIT_UNLIMITED,
            allow_stats: true,
            allowed_query_types: Vec::new(),
            memify_max_epochs: None,
        }
    }
}

impl PermissionGrant {
    pub fn allows_query_type(&self, qt: crate::QueryType) -> bool {
        self.allowed_query_types.is_empty() || self.allowed_query_types.contains(&qt)
    }
}

/// A tenant-owned knowledge base: one Storage Engine file, one embedding-model descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cube {
    pub id: i64,
    pub uuid: String,
    pub tenant: TenantId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expire_at: Option<String>,
    pub permissions: PermissionGrant,
    /// Chain of ancestor Cube UUIDs, oldest first, recorded at each Import.
    #[serde(default)]
    pub lineage: Vec<String>,
    /// Export record this Cube originated from, if it was Imported.
    #[serde(default)]
    pub source_export_uuid: Option<String>,
    pub embedding: EmbeddingDescriptor,
    pub created_at: String,
}

/// A Cube's embedding-model descriptor: fixed at creation, reused by every
/// subsequent Absorb/Query/Memify call against that Cube. `provider_family` and
/// `model` are opaque strings here (this crate does not depend on `cuber-provider`);
/// the service layer resolves them into a concrete provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingDescriptor {
    pub provider_family: String,
    pub model: String,
    pub dimension: u32,
    #[serde(default)]
    pub base_url: Option<String>,
    /// API key encrypted at rest under `CUBER_CRYPTO_SECRET_KEY`.
    pub encrypted_api_key: String,
}

/// Provenance record for one ingested source file/blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Data {
    pub id: String,
    pub memory_group: String,
    pub name: String,
    pub raw_location: String,
    #[serde(default)]
    pub original_location: Option<String>,
    pub extension: String,
    pub mime_type: String,
    pub content_hash: String,
    pub owner_id: String,
    pub created_at: String,
}

/// A logical text extracted from a Data row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub memory_group: String,
    pub data_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A contiguous sub-span of a Document, the unit of vector retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub memory_group: String,
    pub document_id: String,
    pub text: String,
    pub token_count: u32,
    pub chunk_index: u32,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

/// Typed knowledge-graph vertex kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Entity,
    Summary,
    Rule,
    Unknown,
    Capability,
    /// A synthetic bridge node pointing at a persisted Chunk, so graph traversal can
    /// reach chunk-level retrieval.
    DocumentChunk,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Entity => "entity",
            NodeType::Summary => "summary",
            NodeType::Rule => "rule",
            NodeType::Unknown => "unknown",
            NodeType::Capability => "capability",
            NodeType::DocumentChunk => "document_chunk",
        }
    }
}

/// Directed, typed, weighted knowledge-graph vertex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// Already qualified with the memory group; see [`qualify_node_id`].
    pub id: String,
    pub memory_group: String,
    pub node_type: NodeType,
    pub name: String,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub created_at: String,
}

/// Directed, typed, weighted relation between two GraphNodes.
///
/// The MERGE key is `(source, target, edge_type, memory_group)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub edge_type: String,
    pub memory_group: String,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    pub weight: f32,
    pub confidence: f32,
    pub created_at: String,
}

impl GraphEdge {
    /// `weight * confidence`; edges below the prune threshold are removed by Memify.
    pub fn survival_score(&self) -> f32 {
        self.weight * self.confidence
    }
}

/// A `(source node, edge, target node)` returned by one-hop graph traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Triple {
    pub source: GraphNode,
    pub edge: GraphEdge,
    pub target: GraphNode,
}

/// Metabolism verdict applied to one edge during a Memify refinement pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeVerdict {
    Strengthen,
    Weaken,
    Delete,
    Keep,
}

/// Token usage accounting, threaded through pipeline tasks and query answers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

impl std::ops::Add for TokenUsage {
    type Output = TokenUsage;
    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_grant_of_n_permits_exactly_n_uses() {
        let mut limit: Limit = 2;
        let first = consume_limit(limit).expect("first use permitted");
        assert_eq!(first.remaining, 1);
        limit = first.to_store;

        let second = consume_limit(limit).expect("second use permitted");
        assert_eq!(second.remaining, 0);
        limit = second.to_store;
        assert!(limit < 0, "last use must store a forbidden sentinel, not 0");

        assert!(
            consume_limit(limit).is_none(),
            "a third use of a grant of 2 must be rejected, not treated as unlimited"
        );
    }

    #[test]
    fn unlimited_stays_unlimited() {
        let consumption = consume_limit(0).expect("unlimited is never forbidden");
        assert_eq!(consumption.to_store, 0);
        assert_eq!(consumption.remaining, 0);
    }

    #[test]
    fn already_forbidden_is_rejected() {
        assert!(consume_limit(-1).is_none());
    }
}
