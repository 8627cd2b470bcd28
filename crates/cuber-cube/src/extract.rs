//! GraphExtract task: per-chunk LLM call that turns chunk text into candidate
//! graph nodes/edges, plus any unanswered questions the model flags as Unknowns for
//! Memify's Phase A meta-cognition.

use crate::json_sanitize::extract_object;
use crate::render::render_triples;
use chrono::Utc;
use cuber_types::{qualify_node_id, ChatProvider, Chunk, GraphEdge, GraphNode, NodeType, Triple, TokenUsage};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Upper bound on concurrent extraction calls in flight.
pub const EXTRACT_CONCURRENCY: usize = 5;

/// Initial weight/confidence assigned to a freshly extracted edge; Memify is the
/// only thing that ever moves these away from 1.0.
const INITIAL_EDGE_METRIC: f32 = 1.0;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("chat provider: {0}")]
    Provider(#[from] cuber_types::ProviderError),
    #[error("model response for chunk {chunk_id} was not valid JSON: {source}")]
    MalformedResponse {
        chunk_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("model response for chunk {chunk_id} contained no JSON object")]
    NoJsonObject { chunk_id: String },
}

#[derive(Debug, Clone)]
pub struct UnknownCandidate {
    pub text: String,
    pub resolution_requirement: Option<String>,
}

/// Everything extracted from one chunk, kept grouped so Store can bridge
/// graph <-> chunk with a per-chunk `document_chunk` node.
#[derive(Debug, Clone)]
pub struct ChunkExtraction {
    pub chunk_id: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub unknowns: Vec<UnknownCandidate>,
}

#[derive(Debug, Clone)]
pub struct GraphExtractOutput {
    pub chunks: Vec<Chunk>,
    pub extractions: Vec<ChunkExtraction>,
    /// Human-readable rendering of every triple extracted this pass.
    pub rendering: String,
}

#[derive(Deserialize, Default)]
struct RawExtraction {
    #[serde(default)]
    nodes: Vec<RawNode>,
    #[serde(default)]
    edges: Vec<RawEdge>,
    #[serde(default)]
    unknowns: Vec<RawUnknown>,
}

#[derive(Deserialize)]
struct RawNode {
    id: String,
    #[serde(rename = "type", default)]
    node_type: Option<String>,
    name: String,
}

#[derive(Deserialize)]
struct RawEdge {
    source: String,
    target: String,
    #[serde(rename = "type")]
    edge_type: String,
}

#[derive(Deserialize)]
struct RawUnknown {
    text: String,
    #[serde(default)]
    resolution_requirement: Option<String>,
}

fn parse_node_type(raw: Option<&str>) -> NodeType {
    match raw.map(str::to_lowercase).as_deref() {
        Some("summary") => NodeType::Summary,
        Some("rule") => NodeType::Rule,
        Some("unknown") => NodeType::Unknown,
        Some("capability") => NodeType::Capability,
        _ => NodeType::Entity,
    }
}

const SYSTEM_PROMPT_EN: &str = "You extract a knowledge graph from one passage of text. \
Reply with one JSON object and nothing else: \
{\"nodes\":[{\"id\":\"slug\",\"type\":\"entity\",\"name\":\"Display Name\"}], \
\"edges\":[{\"source\":\"slug\",\"target\":\"slug\",\"type\":\"RELATION_TYPE\"}], \
\"unknowns\":[{\"text\":\"unanswered question raised by the passage\",\"resolution_requirement\":\"what would resolve it\"}]}. \
Node ids must be short stable slugs; omit unknowns entirely if none were raised.";

const SYSTEM_PROMPT_JA: &str = "与えられた一節からナレッジグラフを抽出してください。\
次のJSONオブジェクトのみを返答してください: \
{\"nodes\":[{\"id\":\"slug\",\"type\":\"entity\",\"name\":\"表示名\"}], \
\"edges\":[{\"source\":\"slug\",\"target\":\"slug\",\"type\":\"RELATION_TYPE\"}], \
\"unknowns\":[{\"text\":\"未解決の疑問\",\"resolution_requirement\":\"解決に必要な情報\"}]}。\
未解決の疑問がなければunknownsは省略してください。";

async fn extract_one<C: ChatProvider>(
    chat: &C,
    chunk: &Chunk,
    memory_group: &str,
    is_en: bool,
    cancel: &CancellationToken,
) -> Result<(ChunkExtraction, TokenUsage), ExtractError> {
    let system_prompt = if is_en { SYSTEM_PROMPT_EN } else { SYSTEM_PROMPT_JA };
    let (raw_response, usage) = chat.generate(system_prompt, &chunk.text, cancel).await?;

    let object = extract_object(&raw_response).ok_or_else(|| ExtractError::NoJsonObject {
        chunk_id: chunk.id.clone(),
    })?;
    let parsed: RawExtraction =
        serde_json::from_str(object).map_err(|source| ExtractError::MalformedResponse {
            chunk_id: chunk.id.clone(),
            source,
        })?;

    let now = Utc::now().to_rfc3339();
    let nodes: Vec<GraphNode> = parsed
        .nodes
        .into_iter()
        .map(|n| GraphNode {
            id: qualify_node_id(&n.id, memory_group),
            memory_group: memory_group.to_string(),
            node_type: parse_node_type(n.node_type.as_deref()),
            name: n.name,
            properties: HashMap::new(),
            embedding: Vec::new(),
            created_at: now.clone(),
        })
        .collect();

    let edges: Vec<GraphEdge> = parsed
        .edges
        .into_iter()
        .map(|e| GraphEdge {
            source: qualify_node_id(&e.source, memory_group),
            target: qualify_node_id(&e.target, memory_group),
            edge_type: e.edge_type,
            memory_group: memory_group.to_string(),
            properties: HashMap::new(),
            weight: INITIAL_EDGE_METRIC,
            confidence: INITIAL_EDGE_METRIC,
            created_at: now.clone(),
        })
        .collect();

    let unknowns = parsed
        .unknowns
        .into_iter()
        .map(|u| UnknownCandidate {
            text: u.text,
            resolution_requirement: u.resolution_requirement,
        })
        .collect();

    Ok((
        ChunkExtraction {
            chunk_id: chunk.id.clone(),
            nodes,
            edges,
            unknowns,
        },
        usage,
    ))
}

/// Run GraphExtract over every chunk with bounded concurrency, then render a
/// best-effort passage over the triples whose both endpoints were extracted in the
/// same call (cross-chunk edges are rendered later, once persisted, by the Query
/// Engine's own graph pull).
pub async fn run_extract<C: ChatProvider + ?Sized>(
    chat: &C,
    chunks: Vec<Chunk>,
    memory_group: &str,
    is_en: bool,
    cancel: &CancellationToken,
) -> Result<(GraphExtractOutput, TokenUsage), ExtractError> {
    let results: Vec<Result<(ChunkExtraction, TokenUsage), ExtractError>> =
        stream::iter(chunks.iter())
            .map(|chunk| extract_one(chat, chunk, memory_group, is_en, cancel))
            .buffer_unordered(EXTRACT_CONCURRENCY)
            .collect()
            .await;

    let mut usage = TokenUsage::default();
    let mut extractions = Vec::with_capacity(results.len());
    for result in results {
        let (extraction, delta) = result?;
        usage.add(delta);
        extractions.push(extraction);
    }

    let mut rendered_triples = Vec::new();
    for extraction in &extractions {
        let by_id: HashMap<&str, &GraphNode> =
            extraction.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        for edge in &extraction.edges {
            if let (Some(source), Some(target)) =
                (by_id.get(edge.source.as_str()), by_id.get(edge.target.as_str()))
            {
                rendered_triples.push(Triple {
                    source: (*source).clone(),
                    edge: edge.clone(),
                    target: (*target).clone(),
                });
            }
        }
    }

    Ok((
        GraphExtractOutput {
            chunks,
            extractions,
            rendering: render_triples(&rendered_triples, is_en),
        },
        usage,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuber_provider::mock::MockChatProvider;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.into(),
            memory_group: "g".into(),
            document_id: "doc-1".into(),
            text: text.into(),
            token_count: 2,
            chunk_index: 0,
            embedding: vec![],
        }
    }

    #[tokio::test]
    async fn sanitizes_and_qualifies_a_well_formed_response() {
        let chat = MockChatProvider::graph_extraction_stub();
        let (output, _usage) = run_extract(
            &chat,
            vec![chunk("c0", "Alpha is great")],
            "g",
            true,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(output.extractions.len(), 1);
        let node = &output.extractions[0].nodes[0];
        assert_eq!(node.id, "alpha::g");
        assert!(output.extractions[0].edges.is_empty());
    }

    #[tokio::test]
    async fn malformed_response_without_braces_is_an_error() {
        let chat = MockChatProvider::new("no json at all".to_string());
        let err = run_extract(&chat, vec![chunk("c0", "text")], "g", true, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::NoJsonObject { .. }));
    }

    #[tokio::test]
    async fn runs_many_chunks_concurrently_and_accumulates_usage() {
        let chat = MockChatProvider::graph_extraction_stub();
        let chunks: Vec<Chunk> = (0..8).map(|i| chunk(&format!("c{i}"), "some text here")).collect();
        let (output, usage) = run_extract(&chat, chunks, "g", true, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.extractions.len(), 8);
        assert!(usage.input_tokens > 0);
    }
}
