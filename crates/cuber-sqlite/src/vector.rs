//! `VectorStorage` over the shared connection.
//!
//! `table` is an opaque partition key: `"chunk"` addresses the `chunks` table, any other
//! value addresses `graph_nodes` filtered by `node_type = table` (the Entity/Summary/
//! Rule/Unknown/Capability/document_chunk variants, all sharing one identity scheme).
//! SQLite has no native vector index, so `query` reads the candidate rows and ranks them
//! by cosine similarity in Rust — brute-force kNN, since this engine has no separate
//! vector database to defer to.

use crate::connection::{decode_vector, encode_vector, SqliteStore};
use async_trait::async_trait;
use cuber_types::{StorageError, VecSearchHit, VectorStorage};
use std::collections::HashMap;

const CHUNK_TABLE: &str = "chunk";

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait]
impl VectorStorage for SqliteStore {
    async fn save_embedding(
        &self,
        table: &str,
        id: &str,
        text: &str,
        vector: &[f32],
        memory_group: &str,
    ) -> Result<(), StorageError> {
        if vector.len() != self.embedding_dimension as usize {
            return Err(StorageError::DimensionMismatch {
                expected: self.embedding_dimension as usize,
                got: vector.len(),
            });
        }
        let blob = encode_vector(vector);
        if table == CHUNK_TABLE {
            let changed = self.with_conn(|conn| {
                conn.execute(
                    "UPDATE chunks SET text = ?1, embedding = ?2 WHERE id = ?3 AND memory_group = ?4",
                    rusqlite::params![text, blob, id, memory_group],
                )
            })?;
            if changed == 0 {
                return Err(StorageError::NotFound(format!("chunk {id}")));
            }
            return Ok(());
        }
        let now = chrono::Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO graph_nodes (id, memory_group, node_type, name, properties, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, '{}', ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, embedding = excluded.embedding",
                rusqlite::params![id, memory_group, table, text, blob, now],
            )
        })?;
        Ok(())
    }

    async fn query(
        &self,
        table: &str,
        vector: &[f32],
        top_k: usize,
        memory_group: &str,
    ) -> Result<Vec<VecSearchHit>, StorageError> {
        if vector.is_empty() {
            return Err(StorageError::Validation("query vector is empty".into()));
        }
        let rows: Vec<(String, String, Vec<u8>)> = if table == CHUNK_TABLE {
            self.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, text, embedding FROM chunks WHERE memory_group = ?1 AND embedding IS NOT NULL",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![memory_group], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })?
        } else {
            self.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, embedding FROM graph_nodes
                     WHERE node_type = ?1 AND memory_group = ?2 AND embedding IS NOT NULL",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![table, memory_group], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })?
        };

        let mut hits: Vec<VecSearchHit> = rows
            .into_iter()
            .map(|(id, text, blob)| {
                let score = cosine_similarity(vector, &decode_vector(&blob));
                VecSearchHit { id, text, score }
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn get_embedding(
        &self,
        table: &str,
        id: &str,
        memory_group: &str,
    ) -> Result<Option<Vec<f32>>, StorageError> {
        let blob: Option<Option<Vec<u8>>> = if table == CHUNK_TABLE {
            self.with_conn(|conn| {
                conn.query_row(
                    "SELECT embedding FROM chunks WHERE id = ?1 AND memory_group = ?2",
                    rusqlite::params![id, memory_group],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    e => Err(e),
                })
            })?
        } else {
            self.with_conn(|conn| {
                conn.query_row(
                    "SELECT embedding FROM graph_nodes WHERE id = ?1 AND node_type = ?2 AND memory_group = ?3",
                    rusqlite::params![id, table, memory_group],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    e => Err(e),
                })
            })?
        };
        Ok(blob.flatten().map(|b| decode_vector(&b)))
    }

    async fn get_embeddings(
        &self,
        table: &str,
        ids: &[String],
        memory_group: &str,
    ) -> Result<HashMap<String, Vec<f32>>, StorageError> {
        let mut out = HashMap::new();
        for id in ids {
            if let Some(v) = self.get_embedding(table, id, memory_group).await? {
                out.insert(id.clone(), v);
            }
        }
        Ok(out)
    }

    async fn delete_embedding(
        &self,
        table: &str,
        id: &str,
        memory_group: &str,
    ) -> Result<(), StorageError> {
        if table == CHUNK_TABLE {
            self.with_conn(|conn| {
                conn.execute(
                    "UPDATE chunks SET embedding = NULL WHERE id = ?1 AND memory_group = ?2",
                    rusqlite::params![id, memory_group],
                )
            })?;
        } else {
            self.with_conn(|conn| {
                conn.execute(
                    "DELETE FROM graph_nodes WHERE id = ?1 AND node_type = ?2 AND memory_group = ?3",
                    rusqlite::params![id, table, memory_group],
                )
            })?;
        }
        Ok(())
    }
}
