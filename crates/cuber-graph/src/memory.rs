//! In-memory `GraphStorage` reference implementation. The SQLite-backed engine
//! (`cuber-sqlite`) is the real production store; this one backs isolated unit tests for
//! Absorb/Query/Memify logic that don't need to stand up a file-backed Cube.

use cuber_types::{GraphEdge, GraphNode, GraphStorage, NodeType, StorageError, Triple};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

type EdgeKey = (String, String, String, String);

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, GraphNode>,
    edges: HashMap<EdgeKey, GraphEdge>,
}

/// Graph store guarded by a single `RwLock`, scoped by `memory_group` on every read the
/// way the SQLite engine is.
pub struct InMemoryGraphStore {
    inner: RwLock<Inner>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn edge_key(edge: &GraphEdge) -> EdgeKey {
        (
            edge.source.clone(),
            edge.target.clone(),
            edge.edge_type.clone(),
            edge.memory_group.clone(),
        )
    }
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl GraphStorage for InMemoryGraphStore {
    async fn add_nodes(&self, nodes: &[GraphNode]) -> Result<(), StorageError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        for node in nodes {
            guard.nodes.insert(node.id.clone(), node.clone());
        }
        Ok(())
    }

    async fn add_edges(&self, edges: &[GraphEdge]) -> Result<(), StorageError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        for edge in edges {
            if !guard.nodes.contains_key(&edge.source) || !guard.nodes.contains_key(&edge.target) {
                return Err(StorageError::EdgeEndpointsNotFound(
                    edge.source.clone(),
                    edge.target.clone(),
                ));
            }
            guard.edges.insert(Self::edge_key(edge), edge.clone());
        }
        Ok(())
    }

    async fn get_triples(
        &self,
        node_ids: &[String],
        memory_group: &str,
    ) -> Result<Vec<Triple>, StorageError> {
        let guard = self
            .inner
            .read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let wanted: std::collections::HashSet<&str> =
            node_ids.iter().map(String::as_str).collect();
        let mut triples = Vec::new();
        for edge in guard.edges.values() {
            if edge.memory_group != memory_group {
                continue;
            }
            if wanted.contains(edge.source.as_str()) || wanted.contains(edge.target.as_str()) {
                if let (Some(source), Some(target)) =
                    (guard.nodes.get(&edge.source), guard.nodes.get(&edge.target))
                {
                    triples.push(Triple {
                        source: source.clone(),
                        edge: edge.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        Ok(triples)
    }

    async fn get_node(
        &self,
        id: &str,
        memory_group: &str,
    ) -> Result<Option<GraphNode>, StorageError> {
        let guard = self
            .inner
            .read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(guard
            .nodes
            .get(id)
            .filter(|n| n.memory_group == memory_group)
            .cloned())
    }

    async fn get_nodes_by_type(
        &self,
        node_type: NodeType,
        memory_group: &str,
    ) -> Result<Vec<GraphNode>, StorageError> {
        let guard = self
            .inner
            .read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(guard
            .nodes
            .values()
            .filter(|n| n.node_type == node_type && n.memory_group == memory_group)
            .cloned()
            .collect())
    }

    async fn get_nodes_by_incoming_edge(
        &self,
        target: &str,
        edge_type: &str,
        memory_group: &str,
    ) -> Result<Vec<GraphNode>, StorageError> {
        let guard = self
            .inner
            .read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let mut out = Vec::new();
        for edge in guard.edges.values() {
            if edge.target == target
                && edge.edge_type == edge_type
                && edge.memory_group == memory_group
            {
                if let Some(source) = guard.nodes.get(&edge.source) {
                    out.push(source.clone());
                }
            }
        }
        Ok(out)
    }

    async fn get_edges_by_node(
        &self,
        node_id: &str,
        memory_group: &str,
    ) -> Result<Vec<GraphEdge>, StorageError> {
        let guard = self
            .inner
            .read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(guard
            .edges
            .values()
            .filter(|e| {
                e.memory_group == memory_group && (e.source == node_id || e.target == node_id)
            })
            .cloned()
            .collect())
    }

    async fn update_edge_metrics(
        &self,
        source: &str,
        target: &str,
        edge_type: &str,
        memory_group: &str,
        weight: f32,
        confidence: f32,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let key = (
            source.to_string(),
            target.to_string(),
            edge_type.to_string(),
            memory_group.to_string(),
        );
        let edge = guard
            .edges
            .get_mut(&key)
            .ok_or_else(|| StorageError::NotFound(format!("edge {source}->{target}")))?;
        edge.weight = weight.clamp(0.0, 1.0);
        edge.confidence = confidence.clamp(0.0, 1.0);
        Ok(())
    }

    async fn delete_edge(
        &self,
        source: &str,
        target: &str,
        edge_type: &str,
        memory_group: &str,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        guard.edges.remove(&(
            source.to_string(),
            target.to_string(),
            edge_type.to_string(),
            memory_group.to_string(),
        ));
        Ok(())
    }

    async fn delete_node(
        &self,
        id: &str,
        memory_group: &str,
        detach: bool,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        if detach {
            guard.edges.retain(|_, e| {
                !(e.memory_group == memory_group && (e.source == id || e.target == id))
            });
        }
        guard.nodes.remove(id);
        Ok(())
    }

    async fn get_orphan_nodes(
        &self,
        memory_group: &str,
        grace_period: Duration,
    ) -> Result<Vec<GraphNode>, StorageError> {
        let guard = self
            .inner
            .read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let has_edge: std::collections::HashSet<&str> = guard
            .edges
            .values()
            .filter(|e| e.memory_group == memory_group)
            .flat_map(|e| [e.source.as_str(), e.target.as_str()])
            .collect();
        let cutoff = chrono::Utc::now() - chrono::Duration::from_std(grace_period).unwrap_or_default();
        let mut out = Vec::new();
        for node in guard.nodes.values() {
            if node.memory_group != memory_group || has_edge.contains(node.id.as_str()) {
                continue;
            }
            let created: chrono::DateTime<chrono::Utc> = match node.created_at.parse() {
                Ok(t) => t,
                Err(_) => continue,
            };
            if created < cutoff {
                out.push(node.clone());
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, group: &str) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            memory_group: group.to_string(),
            node_type: NodeType::Entity,
            name: id.to_string(),
            properties: Default::default(),
            embedding: vec![],
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn edge(src: &str, dst: &str, group: &str) -> GraphEdge {
        GraphEdge {
            source: src.to_string(),
            target: dst.to_string(),
            edge_type: "related_to".to_string(),
            memory_group: group.to_string(),
            properties: Default::default(),
            weight: 1.0,
            confidence: 1.0,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn add_edges_rejects_missing_endpoints() {
        let store = InMemoryGraphStore::new();
        let err = store
            .add_edges(&[edge("a::g", "b::g", "g")])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::EdgeEndpointsNotFound(_, _)));
    }

    #[tokio::test]
    async fn add_edges_upserts_by_merge_key() {
        let store = InMemoryGraphStore::new();
        store
            .add_nodes(&[node("a::g", "g"), node("b::g", "g")])
            .await
            .unwrap();
        let mut e = edge("a::g", "b::g", "g");
        store.add_edges(&[e.clone()]).await.unwrap();
        e.weight = 0.5;
        store.add_edges(&[e]).await.unwrap();

        let edges = store.get_edges_by_node("a::g", "g").await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].weight, 0.5);
    }

    #[tokio::test]
    async fn get_triples_returns_one_hop_neighborhood() {
        let store = InMemoryGraphStore::new();
        store
            .add_nodes(&[node("a::g", "g"), node("b::g", "g"), node("c::g", "g")])
            .await
            .unwrap();
        store
            .add_edges(&[edge("a::g", "b::g", "g"), edge("b::g", "c::g", "g")])
            .await
            .unwrap();

        let triples = store
            .get_triples(&["a::g".to_string()], "g")
            .await
            .unwrap();
        assert_eq!(triples.len(), 1);
    }

    #[tokio::test]
    async fn delete_node_detach_removes_incident_edges() {
        let store = InMemoryGraphStore::new();
        store
            .add_nodes(&[node("a::g", "g"), node("b::g", "g")])
            .await
            .unwrap();
        store.add_edges(&[edge("a::g", "b::g", "g")]).await.unwrap();
        store.delete_node("a::g", "g", true).await.unwrap();
        let edges = store.get_edges_by_node("b::g", "g").await.unwrap();
        assert!(edges.is_empty());
    }

    #[tokio::test]
    async fn get_nodes_by_type_filters_by_memory_group() {
        let store = InMemoryGraphStore::new();
        store
            .add_nodes(&[node("a::g1", "g1"), node("b::g2", "g2")])
            .await
            .unwrap();
        let found = store
            .get_nodes_by_type(NodeType::Entity, "g1")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a::g1");
    }
}
