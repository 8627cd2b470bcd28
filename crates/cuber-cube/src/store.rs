//! Store task: the final Absorb stage. Embeds anything GraphExtract left
//! un-embedded, persists chunks, bridges graph <-> chunks with a `document_chunk`
//! node per chunk, and upserts the extracted entity graph.

use crate::extract::{GraphExtractOutput, UnknownCandidate};
use chrono::Utc;
use cuber_types::{qualify_node_id, Chunk, CubeStorage, Embedder, GraphEdge, GraphNode, NodeType, TokenUsage};
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage: {0}")]
    Storage(#[from] cuber_types::StorageError),
    #[error("embedder: {0}")]
    Provider(#[from] cuber_types::ProviderError),
}

pub struct StoreOutput {
    pub chunks: Vec<Chunk>,
    pub rendering: String,
    pub unknowns: Vec<UnknownCandidate>,
    /// Display names of every non-bridge node persisted this pass, fed to Memify's
    /// Phase A meta-cognition to resolve outstanding Unknowns.
    pub extracted_names: Vec<String>,
}

const DOCUMENT_CHUNK_EDGE_TYPE: &str = "mentions";

pub async fn run_store<S: CubeStorage, E: Embedder + ?Sized>(
    storage: &S,
    embedder: &E,
    extraction: GraphExtractOutput,
    memory_group: &str,
) -> Result<(StoreOutput, TokenUsage), StoreError> {
    let mut usage = TokenUsage::default();
    let GraphExtractOutput {
        mut chunks,
        extractions,
        rendering,
    } = extraction;

    let to_embed: Vec<usize> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| c.embedding.is_empty())
        .map(|(i, _)| i)
        .collect();
    if !to_embed.is_empty() {
        let texts: Vec<String> = to_embed.iter().map(|&i| chunks[i].text.clone()).collect();
        let (vectors, delta) = embedder.embed_batch(&texts).await?;
        usage.add(delta);
        for (&i, vector) in to_embed.iter().zip(vectors.into_iter()) {
            chunks[i].embedding = vector;
        }
    }
    storage.insert_chunks(&chunks).await?;

    let chunks_by_id: HashMap<&str, &Chunk> = chunks.iter().map(|c| (c.id.as_str(), c)).collect();
    let now = Utc::now().to_rfc3339();

    let mut bridge_nodes = Vec::new();
    let mut bridge_edges = Vec::new();
    let mut entity_nodes: HashMap<String, GraphNode> = HashMap::new();
    let mut entity_edges = Vec::new();
    let mut unknowns = Vec::new();

    for ce in extractions {
        let Some(chunk) = chunks_by_id.get(ce.chunk_id.as_str()) else {
            continue;
        };
        let bridge_id = qualify_node_id(&chunk.id, memory_group);
        bridge_nodes.push(GraphNode {
            id: bridge_id.clone(),
            memory_group: memory_group.to_string(),
            node_type: NodeType::DocumentChunk,
            name: chunk.text.chars().take(80).collect(),
            properties: HashMap::new(),
            embedding: chunk.embedding.clone(),
            created_at: now.clone(),
        });

        for node in ce.nodes {
            bridge_edges.push(GraphEdge {
                source: bridge_id.clone(),
                target: node.id.clone(),
                edge_type: DOCUMENT_CHUNK_EDGE_TYPE.to_string(),
                memory_group: memory_group.to_string(),
                properties: HashMap::new(),
                weight: 1.0,
                confidence: 1.0,
                created_at: now.clone(),
            });
            entity_nodes.entry(node.id.clone()).or_insert(node);
        }
        entity_edges.extend(ce.edges);
        unknowns.extend(ce.unknowns);
    }

    let entity_nodes: Vec<GraphNode> = entity_nodes.into_values().collect();

    // Nodes must exist before edges can reference them (add_edges validates both
    // endpoints up front), and before bridge edges point at them.
    storage.add_nodes(&entity_nodes).await?;
    storage.add_nodes(&bridge_nodes).await?;
    storage.add_edges(&entity_edges).await?;
    storage.add_edges(&bridge_edges).await?;

    let mut extracted_names = Vec::with_capacity(entity_nodes.len());
    if !entity_nodes.is_empty() {
        let texts: Vec<String> = entity_nodes.iter().map(|n| n.name.clone()).collect();
        let (vectors, delta) = embedder.embed_batch(&texts).await?;
        usage.add(delta);
        for (node, vector) in entity_nodes.iter().zip(vectors.into_iter()) {
            storage
                .save_embedding(node.node_type.as_str(), &node.id, &node.name, &vector, memory_group)
                .await?;
            extracted_names.push(node.name.clone());
        }
    }

    for node in &entity_nodes {
        storage.index(&node.id, &node.name, memory_group).await?;
    }

    Ok((
        StoreOutput {
            chunks,
            rendering,
            unknowns,
            extracted_names,
        },
        usage,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ChunkExtraction;
    use cuber_provider::mock::MockEmbedder;
    use cuber_sqlite::SqliteStore;

    fn extraction() -> GraphExtractOutput {
        let chunk = Chunk {
            id: "doc-1-c0".into(),
            memory_group: "g".into(),
            document_id: "doc-1".into(),
            text: "Alpha orbits Beta".into(),
            token_count: 3,
            chunk_index: 0,
            embedding: vec![],
        };
        let now = Utc::now().to_rfc3339();
        let alpha = GraphNode {
            id: qualify_node_id("alpha", "g"),
            memory_group: "g".into(),
            node_type: NodeType::Entity,
            name: "Alpha".into(),
            properties: HashMap::new(),
            embedding: vec![],
            created_at: now.clone(),
        };
        let beta = GraphNode {
            id: qualify_node_id("beta", "g"),
            memory_group: "g".into(),
            node_type: NodeType::Entity,
            name: "Beta".into(),
            properties: HashMap::new(),
            embedding: vec![],
            created_at: now.clone(),
        };
        let edge = GraphEdge {
            source: alpha.id.clone(),
            target: beta.id.clone(),
            edge_type: "ORBITS".into(),
            memory_group: "g".into(),
            properties: HashMap::new(),
            weight: 1.0,
            confidence: 1.0,
            created_at: now,
        };
        GraphExtractOutput {
            chunks: vec![chunk.clone()],
            extractions: vec![ChunkExtraction {
                chunk_id: chunk.id,
                nodes: vec![alpha, beta],
                edges: vec![edge],
                unknowns: vec![],
            }],
            rendering: "Alpha orbits Beta.".into(),
        }
    }

    #[tokio::test]
    async fn persists_chunks_nodes_and_bridge_edges() {
        let storage = SqliteStore::open_in_memory(4).unwrap();
        let embedder = MockEmbedder::new(4);
        let (output, _usage) = run_store(&storage, &embedder, extraction(), "g").await.unwrap();
        assert_eq!(output.chunks.len(), 1);
        assert!(!output.chunks[0].embedding.is_empty());
        assert_eq!(output.extracted_names.len(), 2);

        let triples = storage
            .get_triples(&[qualify_node_id("alpha", "g")], "g")
            .await
            .unwrap();
        assert!(triples
            .iter()
            .any(|t| t.edge.edge_type == "ORBITS" || t.edge.edge_type == "mentions"));
    }
}
