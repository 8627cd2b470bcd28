//! `GraphStorage` over the shared connection: MERGE-upsert nodes/edges, 1-hop
//! traversal, and the metrics mutators Memify drives.

use crate::connection::{decode_vector, encode_vector, SqliteStore};
use async_trait::async_trait;
use cuber_types::{GraphEdge, GraphNode, GraphStorage, NodeType, StorageError, Triple};
use std::time::Duration;

fn node_type_str(t: NodeType) -> &'static str {
    t.as_str()
}

fn parse_node_type(s: &str) -> NodeType {
    match s {
        "entity" => NodeType::Entity,
        "summary" => NodeType::Summary,
        "rule" => NodeType::Rule,
        "unknown" => NodeType::Unknown,
        "capability" => NodeType::Capability,
        _ => NodeType::DocumentChunk,
    }
}

fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<GraphNode> {
    let properties_json: String = row.get(4)?;
    let embedding_blob: Option<Vec<u8>> = row.get(5)?;
    Ok(GraphNode {
        id: row.get(0)?,
        memory_group: row.get(1)?,
        node_type: parse_node_type(&row.get::<_, String>(2)?),
        name: row.get(3)?,
        properties: serde_json::from_str(&properties_json).unwrap_or_default(),
        embedding: embedding_blob.map(|b| decode_vector(&b)).unwrap_or_default(),
        created_at: row.get(6)?,
    })
}

fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<GraphEdge> {
    let properties_json: String = row.get(4)?;
    Ok(GraphEdge {
        source: row.get(0)?,
        target: row.get(1)?,
        edge_type: row.get(2)?,
        memory_group: row.get(3)?,
        properties: serde_json::from_str(&properties_json).unwrap_or_default(),
        weight: row.get(5)?,
        confidence: row.get(6)?,
        created_at: row.get(7)?,
    })
}

const NODE_COLUMNS: &str = "id, memory_group, node_type, name, properties, embedding, created_at";
const EDGE_COLUMNS: &str = "source, target, edge_type, memory_group, properties, weight, confidence, created_at";

#[async_trait]
impl GraphStorage for SqliteStore {
    async fn add_nodes(&self, nodes: &[GraphNode]) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            for node in nodes {
                let properties = serde_json::to_string(&node.properties)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                let embedding = if node.embedding.is_empty() {
                    None
                } else {
                    Some(encode_vector(&node.embedding))
                };
                tx.execute(
                    "INSERT INTO graph_nodes (id, memory_group, node_type, name, properties, embedding, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET
                        node_type = excluded.node_type,
                        name = excluded.name,
                        properties = excluded.properties,
                        embedding = COALESCE(excluded.embedding, graph_nodes.embedding)",
                    rusqlite::params![
                        node.id,
                        node.memory_group,
                        node_type_str(node.node_type),
                        node.name,
                        properties,
                        embedding,
                        node.created_at,
                    ],
                )?;
            }
            tx.commit()
        })
    }

    async fn add_edges(&self, edges: &[GraphEdge]) -> Result<(), StorageError> {
        for edge in edges {
            let endpoints_exist: i64 = self.with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM graph_nodes WHERE id IN (?1, ?2) AND memory_group = ?3",
                    rusqlite::params![edge.source, edge.target, edge.memory_group],
                    |row| row.get(0),
                )
            })?;
            if endpoints_exist < 2 {
                return Err(StorageError::EdgeEndpointsNotFound(
                    edge.source.clone(),
                    edge.target.clone(),
                ));
            }
        }
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            for edge in edges {
                let properties = serde_json::to_string(&edge.properties)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                tx.execute(
                    "INSERT INTO graph_edges (source, target, edge_type, memory_group, properties, weight, confidence, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(source, target, edge_type, memory_group) DO UPDATE SET
                        properties = excluded.properties,
                        weight = excluded.weight,
                        confidence = excluded.confidence",
                    rusqlite::params![
                        edge.source,
                        edge.target,
                        edge.edge_type,
                        edge.memory_group,
                        properties,
                        edge.weight.clamp(0.0, 1.0),
                        edge.confidence.clamp(0.0, 1.0),
                        edge.created_at,
                    ],
                )?;
            }
            tx.commit()
        })
    }

    async fn get_triples(
        &self,
        node_ids: &[String],
        memory_group: &str,
    ) -> Result<Vec<Triple>, StorageError> {
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = node_ids.iter().map(|_| "?".to_string()).collect();
        let in_clause = placeholders.join(",");
        let sql = format!(
            "SELECT e.{cols_e}, sn.{cols_n_s}, tn.{cols_n_t}
             FROM graph_edges e
             JOIN graph_nodes sn ON sn.id = e.source
             JOIN graph_nodes tn ON tn.id = e.target
             WHERE e.memory_group = ?1 AND (e.source IN ({in_clause}) OR e.target IN ({in_clause}))",
            cols_e = edge_cols_prefixed("e"),
            cols_n_s = node_cols_prefixed("sn"),
            cols_n_t = node_cols_prefixed("tn"),
            in_clause = in_clause,
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut params: Vec<&dyn rusqlite::ToSql> = vec![&memory_group];
            let id_refs: Vec<&dyn rusqlite::ToSql> =
                node_ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
            // node_ids appear twice (source IN, target IN)
            params.extend(id_refs.iter().copied());
            params.extend(id_refs.iter().copied());
            let rows = stmt.query_map(params.as_slice(), |row| {
                let edge = row_to_edge_offset(row, 0)?;
                let source = row_to_node_offset(row, 8)?;
                let target = row_to_node_offset(row, 15)?;
                Ok(Triple { source, edge, target })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
    }

    async fn get_node(&self, id: &str, memory_group: &str) -> Result<Option<GraphNode>, StorageError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {NODE_COLUMNS} FROM graph_nodes WHERE id = ?1 AND memory_group = ?2"),
                rusqlite::params![id, memory_group],
                row_to_node,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })
        })
    }

    async fn get_nodes_by_type(
        &self,
        node_type: NodeType,
        memory_group: &str,
    ) -> Result<Vec<GraphNode>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NODE_COLUMNS} FROM graph_nodes WHERE node_type = ?1 AND memory_group = ?2"
            ))?;
            let rows = stmt.query_map(
                rusqlite::params![node_type_str(node_type), memory_group],
                row_to_node,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
    }

    async fn get_nodes_by_incoming_edge(
        &self,
        target: &str,
        edge_type: &str,
        memory_group: &str,
    ) -> Result<Vec<GraphNode>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {cols} FROM graph_nodes n
                 JOIN graph_edges e ON e.source = n.id
                 WHERE e.target = ?1 AND e.edge_type = ?2 AND e.memory_group = ?3",
                cols = node_cols_prefixed("n"),
            ))?;
            let rows = stmt.query_map(rusqlite::params![target, edge_type, memory_group], row_to_node)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
    }

    async fn get_edges_by_node(
        &self,
        node_id: &str,
        memory_group: &str,
    ) -> Result<Vec<GraphEdge>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EDGE_COLUMNS} FROM graph_edges
                 WHERE memory_group = ?1 AND (source = ?2 OR target = ?2)"
            ))?;
            let rows = stmt.query_map(rusqlite::params![memory_group, node_id], row_to_edge)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
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
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE graph_edges SET weight = ?1, confidence = ?2
                 WHERE source = ?3 AND target = ?4 AND edge_type = ?5 AND memory_group = ?6",
                rusqlite::params![
                    weight.clamp(0.0, 1.0),
                    confidence.clamp(0.0, 1.0),
                    source,
                    target,
                    edge_type,
                    memory_group,
                ],
            )
        })?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("edge {source}->{target}")));
        }
        Ok(())
    }

    async fn delete_edge(
        &self,
        source: &str,
        target: &str,
        edge_type: &str,
        memory_group: &str,
    ) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM graph_edges WHERE source = ?1 AND target = ?2 AND edge_type = ?3 AND memory_group = ?4",
                rusqlite::params![source, target, edge_type, memory_group],
            )
        })?;
        Ok(())
    }

    async fn delete_node(&self, id: &str, memory_group: &str, detach: bool) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            if detach {
                tx.execute(
                    "DELETE FROM graph_edges WHERE memory_group = ?1 AND (source = ?2 OR target = ?2)",
                    rusqlite::params![memory_group, id],
                )?;
            }
            tx.execute(
                "DELETE FROM graph_nodes WHERE id = ?1 AND memory_group = ?2",
                rusqlite::params![id, memory_group],
            )?;
            tx.commit()
        })
    }

    async fn get_orphan_nodes(
        &self,
        memory_group: &str,
        grace_period: Duration,
    ) -> Result<Vec<GraphNode>, StorageError> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::from_std(grace_period).unwrap_or_default())
            .to_rfc3339();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {cols} FROM graph_nodes n
                 WHERE n.memory_group = ?1 AND n.created_at < ?2
                 AND NOT EXISTS (
                     SELECT 1 FROM graph_edges e
                     WHERE e.memory_group = ?1 AND (e.source = n.id OR e.target = n.id)
                 )",
                cols = node_cols_prefixed("n"),
            ))?;
            let rows = stmt.query_map(rusqlite::params![memory_group, cutoff], row_to_node)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
    }
}

fn node_cols_prefixed(alias: &str) -> String {
    ["id", "memory_group", "node_type", "name", "properties", "embedding", "created_at"]
        .iter()
        .map(|c| format!("{alias}.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn edge_cols_prefixed(alias: &str) -> String {
    ["source", "target", "edge_type", "memory_group", "properties", "weight", "confidence", "created_at"]
        .iter()
        .map(|c| format!("{alias}.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn row_to_edge_offset(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<GraphEdge> {
    let properties_json: String = row.get(offset + 4)?;
    Ok(GraphEdge {
        source: row.get(offset)?,
        target: row.get(offset + 1)?,
        edge_type: row.get(offset + 2)?,
        memory_group: row.get(offset + 3)?,
        properties: serde_json::from_str(&properties_json).unwrap_or_default(),
        weight: row.get(offset + 5)?,
        confidence: row.get(offset + 6)?,
        created_at: row.get(offset + 7)?,
    })
}

fn row_to_node_offset(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<GraphNode> {
    let properties_json: String = row.get(offset + 4)?;
    let embedding_blob: Option<Vec<u8>> = row.get(offset + 5)?;
    Ok(GraphNode {
        id: row.get(offset)?,
        memory_group: row.get(offset + 1)?,
        node_type: parse_node_type(&row.get::<_, String>(offset + 2)?),
        name: row.get(offset + 3)?,
        properties: serde_json::from_str(&properties_json).unwrap_or_default(),
        embedding: embedding_blob.map(|b| decode_vector(&b)).unwrap_or_default(),
        created_at: row.get(offset + 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(id: &str, group: &str) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            memory_group: group.to_string(),
            node_type: NodeType::Entity,
            name: id.to_string(),
            properties: Default::default(),
            embedding: vec![],
            created_at: Utc::now().to_rfc3339(),
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
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn add_edges_rejects_missing_endpoints() {
        let store = SqliteStore::open_in_memory(4).unwrap();
        let err = store.add_edges(&[edge("a::g", "b::g", "g")]).await.unwrap_err();
        assert!(matches!(err, StorageError::EdgeEndpointsNotFound(_, _)));
    }

    #[tokio::test]
    async fn add_edges_upserts_by_merge_key() {
        let store = SqliteStore::open_in_memory(4).unwrap();
        store.add_nodes(&[node("a::g", "g"), node("b::g", "g")]).await.unwrap();
        let mut e = edge("a::g", "b::g", "g");
        store.add_edges(&[e.clone()]).await.unwrap();
        e.weight = 0.5;
        store.add_edges(&[e]).await.unwrap();

        let edges = store.get_edges_by_node("a::g", "g").await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].weight, 0.5);
    }

    #[tokio::test]
    async fn get_triples_one_hop() {
        let store = SqliteStore::open_in_memory(4).unwrap();
        store
            .add_nodes(&[node("a::g", "g"), node("b::g", "g"), node("c::g", "g")])
            .await
            .unwrap();
        store
            .add_edges(&[edge("a::g", "b::g", "g"), edge("b::g", "c::g", "g")])
            .await
            .unwrap();
        let triples = store.get_triples(&["a::g".to_string()], "g").await.unwrap();
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].target.id, "b::g");
    }

    #[tokio::test]
    async fn orphan_nodes_respect_grace_period() {
        let store = SqliteStore::open_in_memory(4).unwrap();
        store.add_nodes(&[node("a::g", "g")]).await.unwrap();
        let young = store.get_orphan_nodes("g", Duration::from_secs(3600)).await.unwrap();
        assert!(young.is_empty(), "freshly created node must not be orphan-eligible yet");
        let old = store.get_orphan_nodes("g", Duration::from_secs(0)).await.unwrap();
        assert_eq!(old.len(), 1);
    }
}
