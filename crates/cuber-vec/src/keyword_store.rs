//! In-memory `KeywordStorage` reference implementation (BM25 over a per-group index).

use cuber_types::{KeywordStorage, StorageError};
use std::collections::HashMap;
use std::sync::RwLock;

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// term -> (doc_id -> term frequency); doc_id -> document length, scoped to one
/// `memory_group`.
struct GroupIndex {
    term_doc_tf: HashMap<String, HashMap<String, u32>>,
    doc_length: HashMap<String, u32>,
}

impl GroupIndex {
    fn new() -> Self {
        Self {
            term_doc_tf: HashMap::new(),
            doc_length: HashMap::new(),
        }
    }

    fn index_doc(&mut self, id: &str, text: &str) {
        let terms = tokenize(text);
        self.doc_length.insert(id.to_string(), terms.len() as u32);

        let mut term_counts: HashMap<String, u32> = HashMap::new();
        for t in &terms {
            *term_counts.entry(t.clone()).or_insert(0) += 1;
        }
        for (term, count) in term_counts {
            self.term_doc_tf
                .entry(term)
                .or_default()
                .insert(id.to_string(), count);
        }
    }

    fn remove_doc(&mut self, id: &str) {
        self.doc_length.remove(id);
        for postings in self.term_doc_tf.values_mut() {
            postings.remove(id);
        }
    }

    /// BM25 with k1=1.2, b=0.75.
    fn search(&self, query: &str, top_k: usize) -> Vec<(String, f64)> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return vec![];
        }
        let n = self.doc_length.len() as f64;
        if n == 0.0 {
            return vec![];
        }
        let avg_len = self.doc_length.values().sum::<u32>() as f64 / n;

        const K1: f64 = 1.2;
        const B: f64 = 0.75;

        let mut scores: HashMap<String, f64> = HashMap::new();
        for term in &query_terms {
            let Some(postings) = self.term_doc_tf.get(term) else {
                continue;
            };
            let df = postings.len() as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for (id, &tf) in postings {
                let len = self.doc_length.get(id).copied().unwrap_or(0) as f64;
                let norm = (tf as f64 * (K1 + 1.0)) / (tf as f64 + K1 * (1.0 - B + B * len / avg_len));
                *scores.entry(id.clone()).or_insert(0.0) += idf * norm;
            }
        }

        let mut hits: Vec<(String, f64)> = scores.into_iter().collect();
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        hits
    }
}

/// BM25 keyword store scoped by `memory_group`.
pub struct InMemoryKeywordStore {
    by_group: RwLock<HashMap<String, GroupIndex>>,
}

impl InMemoryKeywordStore {
    pub fn new() -> Self {
        Self {
            by_group: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryKeywordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl KeywordStorage for InMemoryKeywordStore {
    async fn index(&self, id: &str, text: &str, memory_group: &str) -> Result<(), StorageError> {
        let mut guard = self
            .by_group
            .write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        guard
            .entry(memory_group.to_string())
            .or_insert_with(GroupIndex::new)
            .index_doc(id, text);
        Ok(())
    }

    async fn remove(&self, id: &str, memory_group: &str) -> Result<(), StorageError> {
        let mut guard = self
            .by_group
            .write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        if let Some(idx) = guard.get_mut(memory_group) {
            idx.remove_doc(id);
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        memory_group: &str,
    ) -> Result<Vec<(String, f64)>, StorageError> {
        let guard = self
            .by_group
            .read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(guard
            .get(memory_group)
            .map(|idx| idx.search(query, top_k))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_ranks_by_bm25_descending() {
        let store = InMemoryKeywordStore::new();
        store
            .index("a", "the quick brown fox jumps", "g")
            .await
            .unwrap();
        store.index("b", "a slow brown bear", "g").await.unwrap();

        let hits = store.search("brown fox", 10, "g").await.unwrap();
        assert_eq!(hits[0].0, "a");
    }

    #[tokio::test]
    async fn search_is_scoped_to_memory_group() {
        let store = InMemoryKeywordStore::new();
        store.index("a", "brown fox", "g1").await.unwrap();
        let hits = store.search("brown fox", 10, "g2").await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn remove_drops_doc_from_subsequent_search() {
        let store = InMemoryKeywordStore::new();
        store.index("a", "brown fox", "g").await.unwrap();
        store.remove("a", "g").await.unwrap();
        let hits = store.search("brown fox", 10, "g").await.unwrap();
        assert!(hits.is_empty());
    }
}
