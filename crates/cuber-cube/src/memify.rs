//! Memify / Metabolism: Phase A meta-cognition runs inline with every Absorb;
//! Phase B edge refinement is invoked separately (by `cuber-service`'s permission gate)
//! as its own operation, possibly recursing over several passes.

use crate::extract::UnknownCandidate;
use crate::json_sanitize::extract_object;
use chrono::Utc;
use cuber_types::{
    qualify_node_id, ChatProvider, CubeStorage, Embedder, EdgeVerdict, GraphEdge, GraphNode,
    MemifyError, NodeType, TokenUsage,
};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const LEARNED_FROM_EDGE_TYPE: &str = "learned_from";
const RESOLVES_EDGE_TYPE: &str = "resolves";

#[derive(Debug, Default)]
pub struct MetaCognitionOutcome {
    pub resolved_unknowns: usize,
    pub new_unknowns: usize,
    pub usage: TokenUsage,
}

/// On Absorb: freshly extracted knowledge texts are compared against the Unknown
/// vector table, and any unanswered questions the model raised are registered as new
/// Unknown nodes.
pub async fn run_meta_cognition<S: CubeStorage, E: Embedder + ?Sized>(
    storage: &S,
    embedder: &E,
    memory_group: &str,
    document_id: &str,
    extracted_texts: &[String],
    new_unknowns: &[UnknownCandidate],
    similarity_threshold: f64,
) -> Result<MetaCognitionOutcome, MemifyError> {
    let mut outcome = MetaCognitionOutcome::default();
    let now = Utc::now().to_rfc3339();

    let document_anchor_id = qualify_node_id(document_id, memory_group);
    let mut anchor_ensured = false;

    for text in extracted_texts {
        let (vector, usage) = embedder.embed(text).await?;
        outcome.usage.add(usage);

        let hits = storage.query("unknown", &vector, 1, memory_group).await?;
        let Some(top) = hits.first() else { continue };
        if top.score < similarity_threshold {
            continue;
        }

        if !anchor_ensured {
            storage
                .add_nodes(&[GraphNode {
                    id: document_anchor_id.clone(),
                    memory_group: memory_group.to_string(),
                    node_type: NodeType::Entity,
                    name: document_id.to_string(),
                    properties: HashMap::new(),
                    embedding: Vec::new(),
                    created_at: now.clone(),
                }])
                .await?;
            anchor_ensured = true;
        }

        let capability_id = qualify_node_id(&Uuid::new_v4().to_string(), memory_group);
        storage
            .add_nodes(&[GraphNode {
                id: capability_id.clone(),
                memory_group: memory_group.to_string(),
                node_type: NodeType::Capability,
                name: text.clone(),
                properties: HashMap::new(),
                embedding: vector.clone(),
                created_at: now.clone(),
            }])
            .await?;
        storage
            .save_embedding("capability", &capability_id, text, &vector, memory_group)
            .await?;

        storage
            .add_edges(&[
                GraphEdge {
                    source: capability_id.clone(),
                    target: document_anchor_id.clone(),
                    edge_type: LEARNED_FROM_EDGE_TYPE.to_string(),
                    memory_group: memory_group.to_string(),
                    properties: HashMap::new(),
                    weight: 1.0,
                    confidence: 1.0,
                    created_at: now.clone(),
                },
                GraphEdge {
                    source: capability_id,
                    target: top.id.clone(),
                    edge_type: RESOLVES_EDGE_TYPE.to_string(),
                    memory_group: memory_group.to_string(),
                    properties: HashMap::new(),
                    weight: 1.0,
                    confidence: 1.0,
                    created_at: now.clone(),
                },
            ])
            .await?;
        outcome.resolved_unknowns += 1;
    }

    for unknown in new_unknowns {
        let (vector, usage) = embedder.embed(&unknown.text).await?;
        outcome.usage.add(usage);
        let id = qualify_node_id(&Uuid::new_v4().to_string(), memory_group);
        let mut properties = HashMap::new();
        if let Some(requirement) = &unknown.resolution_requirement {
            properties.insert(
                "resolution_requirement".to_string(),
                serde_json::Value::String(requirement.clone()),
            );
        }
        storage
            .add_nodes(&[GraphNode {
                id: id.clone(),
                memory_group: memory_group.to_string(),
                node_type: NodeType::Unknown,
                name: unknown.text.clone(),
                properties,
                embedding: vector.clone(),
                created_at: now.clone(),
            }])
            .await?;
        storage
            .save_embedding("unknown", &id, &unknown.text, &vector, memory_group)
            .await?;
    }
    outcome.new_unknowns = new_unknowns.len();

    Ok(outcome)
}

/// Tunables for Phase B edge refinement.
#[derive(Debug, Clone)]
pub struct MemifyConfig {
    /// Confidence/weight gain applied to a Strengthen verdict.
    pub alpha: f32,
    /// Confidence loss applied to a Weaken verdict.
    pub delta: f32,
    /// Edges whose `survival_score()` falls below this are pruned outright.
    pub prune_threshold: f32,
    /// Edges younger than this are protected from pruning regardless of score.
    pub min_survival_protection_hours: i64,
    /// Additional refinement passes beyond the first, each reusing the same node set.
    pub recursive_depth: u32,
}

impl Default for MemifyConfig {
    fn default() -> Self {
        Self {
            alpha: 0.2,
            delta: 0.3,
            prune_threshold: 0.1,
            min_survival_protection_hours: 72,
            recursive_depth: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct MemifyOutcome {
    pub strengthened: usize,
    pub weakened: usize,
    pub deleted: usize,
    pub kept: usize,
    pub pruned: usize,
    pub orphans_removed: usize,
    pub usage: TokenUsage,
}

#[derive(Deserialize)]
struct RawVerdict {
    source: String,
    target: String,
    edge_type: String,
    verdict: EdgeVerdict,
}

#[derive(Deserialize)]
struct RawVerdictResponse {
    #[serde(default)]
    verdicts: Vec<RawVerdict>,
}

const SYSTEM_PROMPT: &str = "You review directed knowledge-graph edges against a rule \
set and decide, per edge, whether to strengthen, weaken, delete, or keep it unchanged. \
Reply with one JSON object and nothing else: \
{\"verdicts\":[{\"source\":\"id\",\"target\":\"id\",\"edge_type\":\"TYPE\",\"verdict\":\"strengthen\"}]}. \
Include every edge exactly once, in the order given.";

fn render_edges_for_review(edges: &[GraphEdge], rules: &[String]) -> String {
    let mut prompt = String::new();
    if !rules.is_empty() {
        prompt.push_str("Rules:\n");
        for rule in rules {
            prompt.push_str("- ");
            prompt.push_str(rule);
            prompt.push('\n');
        }
    }
    prompt.push_str("Edges:\n");
    for edge in edges {
        prompt.push_str(&format!(
            "- {} --[{}]--> {} (weight={:.2}, confidence={:.2})\n",
            edge.source, edge.edge_type, edge.target, edge.weight, edge.confidence
        ));
    }
    prompt
}

async fn request_verdicts<C: ChatProvider + ?Sized>(
    chat: &C,
    edges: &[GraphEdge],
    rules: &[String],
) -> Result<(HashMap<(String, String, String), EdgeVerdict>, TokenUsage), MemifyError> {
    let user_prompt = render_edges_for_review(edges, rules);
    let (raw, usage) = chat.generate(SYSTEM_PROMPT, &user_prompt, &CancellationToken::new()).await?;
    let object = extract_object(&raw)
        .ok_or_else(|| MemifyError::MalformedVerdict("no JSON object in response".to_string()))?;
    let parsed: RawVerdictResponse = serde_json::from_str(object)
        .map_err(|e| MemifyError::MalformedVerdict(e.to_string()))?;
    let map = parsed
        .verdicts
        .into_iter()
        .map(|v| ((v.source, v.target, v.edge_type), v.verdict))
        .collect();
    Ok((map, usage))
}

fn is_within_protection_window(edge: &GraphEdge, hours: i64) -> bool {
    match chrono::DateTime::parse_from_rfc3339(&edge.created_at) {
        Ok(created) => {
            let age = Utc::now().signed_duration_since(created.with_timezone(&Utc));
            age < chrono::Duration::hours(hours)
        }
        Err(_) => false,
    }
}

async fn apply_verdict<S: CubeStorage>(
    storage: &S,
    memory_group: &str,
    edge: &GraphEdge,
    verdict: EdgeVerdict,
    config: &MemifyConfig,
    outcome: &mut MemifyOutcome,
) -> Result<(), MemifyError> {
    if verdict == EdgeVerdict::Delete {
        storage
            .delete_edge(&edge.source, &edge.target, &edge.edge_type, memory_group)
            .await?;
        outcome.deleted += 1;
        return Ok(());
    }

    // Keep/Strengthen/Weaken all fall through the same survival check: the prune rule
    // (`S = weight * confidence; if S < prune_threshold, delete`) applies after every
    // verdict, not only after a metric change.
    let (weight, confidence) = match verdict {
        EdgeVerdict::Strengthen => (
            (edge.weight + config.alpha / 2.0).min(1.0),
            (edge.confidence + config.alpha).min(1.0),
        ),
        EdgeVerdict::Weaken => (edge.weight, (edge.confidence - config.delta).max(0.0)),
        EdgeVerdict::Keep | EdgeVerdict::Delete => (edge.weight, edge.confidence),
    };

    let survival = weight * confidence;
    if survival < config.prune_threshold
        && !is_within_protection_window(edge, config.min_survival_protection_hours)
    {
        storage
            .delete_edge(&edge.source, &edge.target, &edge.edge_type, memory_group)
            .await?;
        outcome.pruned += 1;
    } else {
        if verdict != EdgeVerdict::Keep {
            storage
                .update_edge_metrics(
                    &edge.source,
                    &edge.target,
                    &edge.edge_type,
                    memory_group,
                    weight,
                    confidence,
                )
                .await?;
        }
        match verdict {
            EdgeVerdict::Strengthen => outcome.strengthened += 1,
            EdgeVerdict::Weaken => outcome.weakened += 1,
            EdgeVerdict::Keep | EdgeVerdict::Delete => outcome.kept += 1,
        }
    }
    Ok(())
}

/// Phase B: review every distinct edge incident to `target_node_ids` (or every node of
/// every type, if `None`) against `rules`, apply the model's verdicts, then sweep
/// orphaned nodes. Runs `1 + config.recursive_depth` passes, each re-gathering edges
/// from the same node set so a Delete/prune in one pass can surface new orphans for the
/// next.
pub async fn run_phase_b<S: CubeStorage, C: ChatProvider + ?Sized>(
    storage: &S,
    chat: &C,
    memory_group: &str,
    target_node_ids: Option<&[String]>,
    rules: &[String],
    config: &MemifyConfig,
) -> Result<MemifyOutcome, MemifyError> {
    let mut outcome = MemifyOutcome::default();

    for _ in 0..=config.recursive_depth {
        let node_ids: Vec<String> = match target_node_ids {
            Some(ids) => ids.to_vec(),
            None => {
                let mut all = Vec::new();
                for node_type in [
                    NodeType::Entity,
                    NodeType::Summary,
                    NodeType::Rule,
                    NodeType::Unknown,
                    NodeType::Capability,
                    NodeType::DocumentChunk,
                ] {
                    all.extend(
                        storage
                            .get_nodes_by_type(node_type, memory_group)
                            .await?
                            .into_iter()
                            .map(|n| n.id),
                    );
                }
                all
            }
        };

        let mut seen = HashSet::new();
        let mut edges = Vec::new();
        for node_id in &node_ids {
            for edge in storage.get_edges_by_node(node_id, memory_group).await? {
                let key = (edge.source.clone(), edge.target.clone(), edge.edge_type.clone());
                if seen.insert(key) {
                    edges.push(edge);
                }
            }
        }

        if edges.is_empty() {
            break;
        }

        let (verdicts, usage) = request_verdicts(chat, &edges, rules).await?;
        outcome.usage.add(usage);

        for edge in &edges {
            let key = (edge.source.clone(), edge.target.clone(), edge.edge_type.clone());
            let verdict = verdicts.get(&key).copied().unwrap_or(EdgeVerdict::Keep);
            apply_verdict(storage, memory_group, edge, verdict, config, &mut outcome).await?;
        }
    }

    let orphans = storage
        .get_orphan_nodes(
            memory_group,
            Duration::from_secs((config.min_survival_protection_hours.max(0) as u64) * 3600),
        )
        .await?;
    for orphan in orphans {
        storage.delete_node(&orphan.id, memory_group, true).await?;
        outcome.orphans_removed += 1;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuber_provider::mock::{MockChatProvider, MockEmbedder};
    use cuber_sqlite::SqliteStore;

    #[tokio::test]
    async fn new_unknowns_are_registered_with_embeddings() {
        let storage = SqliteStore::open_in_memory(4).unwrap();
        let embedder = MockEmbedder::new(4);
        let unknowns = vec![UnknownCandidate {
            text: "what powers the core?".into(),
            resolution_requirement: Some("a power source document".into()),
        }];
        let outcome = run_meta_cognition(&storage, &embedder, "g", "doc-1", &[], &unknowns, 0.3)
            .await
            .unwrap();
        assert_eq!(outcome.new_unknowns, 1);
        let nodes = storage.get_nodes_by_type(NodeType::Unknown, "g").await.unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[tokio::test]
    async fn phase_b_deletes_edges_the_model_flags() {
        let storage = SqliteStore::open_in_memory(4).unwrap();
        let now = Utc::now().to_rfc3339();
        let a = GraphNode {
            id: "a::g".into(),
            memory_group: "g".into(),
            node_type: NodeType::Entity,
            name: "A".into(),
            properties: HashMap::new(),
            embedding: vec![],
            created_at: now.clone(),
        };
        let b = GraphNode {
            id: "b::g".into(),
            memory_group: "g".into(),
            node_type: NodeType::Entity,
            name: "B".into(),
            properties: HashMap::new(),
            embedding: vec![],
            created_at: now.clone(),
        };
        storage.add_nodes(&[a, b]).await.unwrap();
        storage
            .add_edges(&[GraphEdge {
                source: "a::g".into(),
                target: "b::g".into(),
                edge_type: "RELATED".into(),
                memory_group: "g".into(),
                properties: HashMap::new(),
                weight: 1.0,
                confidence: 1.0,
                created_at: now,
            }])
            .await
            .unwrap();

        let chat = MockChatProvider::new(
            r#"{"verdicts":[{"source":"a::g","target":"b::g","edge_type":"RELATED","verdict":"delete"}]}"#,
        );
        let outcome = run_phase_b(&storage, &chat, "g", None, &[], &MemifyConfig::default())
            .await
            .unwrap();
        assert_eq!(outcome.deleted, 1);

        let remaining = storage.get_edges_by_node("a::g", "g").await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn phase_b_strengthen_raises_metrics() {
        let storage = SqliteStore::open_in_memory(4).unwrap();
        let now = Utc::now().to_rfc3339();
        storage
            .add_nodes(&[
                GraphNode {
                    id: "a::g".into(),
                    memory_group: "g".into(),
                    node_type: NodeType::Entity,
                    name: "A".into(),
                    properties: HashMap::new(),
                    embedding: vec![],
                    created_at: now.clone(),
                },
                GraphNode {
                    id: "b::g".into(),
                    memory_group: "g".into(),
                    node_type: NodeType::Entity,
                    name: "B".into(),
                    properties: HashMap::new(),
                    embedding: vec![],
                    created_at: now.clone(),
                },
            ])
            .await
            .unwrap();
        storage
            .add_edges(&[GraphEdge {
                source: "a::g".into(),
                target: "b::g".into(),
                edge_type: "RELATED".into(),
                memory_group: "g".into(),
                properties: HashMap::new(),
                weight: 0.5,
                confidence: 0.5,
                created_at: now,
            }])
            .await
            .unwrap();

        let chat = MockChatProvider::new(
            r#"{"verdicts":[{"source":"a::g","target":"b::g","edge_type":"RELATED","verdict":"strengthen"}]}"#,
        );
        let outcome = run_phase_b(&storage, &chat, "g", None, &[], &MemifyConfig::default())
            .await
            .unwrap();
        assert_eq!(outcome.strengthened, 1);
        let edges = storage.get_edges_by_node("a::g", "g").await.unwrap();
        assert!(edges[0].confidence > 0.5);
    }

    #[tokio::test]
    async fn phase_b_prunes_a_kept_edge_below_survival_threshold() {
        let storage = SqliteStore::open_in_memory(4).unwrap();
        let old = (Utc::now() - chrono::Duration::hours(1000)).to_rfc3339();
        storage
            .add_nodes(&[
                GraphNode {
                    id: "a::g".into(),
                    memory_group: "g".into(),
                    node_type: NodeType::Entity,
                    name: "A".into(),
                    properties: HashMap::new(),
                    embedding: vec![],
                    created_at: old.clone(),
                },
                GraphNode {
                    id: "b::g".into(),
                    memory_group: "g".into(),
                    node_type: NodeType::Entity,
                    name: "B".into(),
                    properties: HashMap::new(),
                    embedding: vec![],
                    created_at: old.clone(),
                },
            ])
            .await
            .unwrap();
        storage
            .add_edges(&[GraphEdge {
                source: "a::g".into(),
                target: "b::g".into(),
                edge_type: "RELATED".into(),
                memory_group: "g".into(),
                properties: HashMap::new(),
                weight: 0.1,
                confidence: 0.1,
                created_at: old,
            }])
            .await
            .unwrap();

        let chat = MockChatProvider::new(
            r#"{"verdicts":[{"source":"a::g","target":"b::g","edge_type":"RELATED","verdict":"keep"}]}"#,
        );
        let config = MemifyConfig {
            prune_threshold: 0.05,
            min_survival_protection_hours: 24,
            ..MemifyConfig::default()
        };
        let outcome = run_phase_b(&storage, &chat, "g", None, &[], &config).await.unwrap();
        assert_eq!(outcome.pruned, 1, "a kept edge below the survival threshold must be pruned");

        let remaining = storage.get_edges_by_node("a::g", "g").await.unwrap();
        assert!(remaining.is_empty());
    }
}
