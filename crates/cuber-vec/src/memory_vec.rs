//! In-memory `VectorStorage` reference implementation (brute-force cosine kNN).

use cuber_types::{StorageError, VecSearchHit, VectorStorage};
use std::collections::HashMap;
use std::sync::RwLock;

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();
    let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[derive(Clone)]
struct Row {
    text: String,
    vector: Vec<f32>,
    memory_group: String,
}

/// Keyed by `(table, id)`; scoped to `memory_group` on every read.
pub struct InMemoryVecStore {
    rows: RwLock<HashMap<(String, String), Row>>,
}

impl InMemoryVecStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVecStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl VectorStorage for InMemoryVecStore {
    async fn save_embedding(
        &self,
        table: &str,
        id: &str,
        text: &str,
        vector: &[f32],
        memory_group: &str,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .rows
            .write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        guard.insert(
            (table.to_string(), id.to_string()),
            Row {
                text: text.to_string(),
                vector: vector.to_vec(),
                memory_group: memory_group.to_string(),
            },
        );
        Ok(())
    }

    async fn query(
        &self,
        table: &str,
        vector: &[f32],
        top_k: usize,
        memory_group: &str,
    ) -> Result<Vec<VecSearchHit>, StorageError> {
        let guard = self
            .rows
            .read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let mut candidates: Vec<VecSearchHit> = guard
            .iter()
            .filter(|((t, _), row)| t == table && row.memory_group == memory_group)
            .map(|((_, id), row)| VecSearchHit {
                id: id.clone(),
                text: row.text.clone(),
                score: cosine_similarity(vector, &row.vector),
            })
            .collect();
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(top_k);
        Ok(candidates)
    }

    async fn get_embedding(
        &self,
        table: &str,
        id: &str,
        memory_group: &str,
    ) -> Result<Option<Vec<f32>>, StorageError> {
        let guard = self
            .rows
            .read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(guard
            .get(&(table.to_string(), id.to_string()))
            .filter(|row| row.memory_group == memory_group)
            .map(|row| row.vector.clone()))
    }

    async fn get_embeddings(
        &self,
        table: &str,
        ids: &[String],
        memory_group: &str,
    ) -> Result<HashMap<String, Vec<f32>>, StorageError> {
        let guard = self
            .rows
            .read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let mut out = HashMap::new();
        for id in ids {
            if let Some(row) = guard.get(&(table.to_string(), id.clone())) {
                if row.memory_group == memory_group {
                    out.insert(id.clone(), row.vector.clone());
                }
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
        let mut guard = self
            .rows
            .write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        if guard
            .get(&(table.to_string(), id.to_string()))
            .is_some_and(|row| row.memory_group == memory_group)
        {
            guard.remove(&(table.to_string(), id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn query_ranks_by_cosine_similarity_descending() {
        let store = InMemoryVecStore::new();
        store
            .save_embedding("chunk", "a", "alpha", &[1.0, 0.0], "g")
            .await
            .unwrap();
        store
            .save_embedding("chunk", "b", "beta", &[0.0, 1.0], "g")
            .await
            .unwrap();

        let hits = store.query("chunk", &[1.0, 0.0], 2, "g").await.unwrap();
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn query_is_scoped_to_memory_group() {
        let store = InMemoryVecStore::new();
        store
            .save_embedding("chunk", "a", "alpha", &[1.0, 0.0], "g1")
            .await
            .unwrap();
        let hits = store.query("chunk", &[1.0, 0.0], 10, "g2").await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn delete_embedding_is_scoped_to_memory_group() {
        let store = InMemoryVecStore::new();
        store
            .save_embedding("chunk", "a", "alpha", &[1.0, 0.0], "g1")
            .await
            .unwrap();
        store.delete_embedding("chunk", "a", "g2").await.unwrap();
        assert!(store
            .get_embedding("chunk", "a", "g1")
            .await
            .unwrap()
            .is_some());
    }
}
