//! `KeywordStorage`: manual BM25 inverted index over `keyword_terms`/`keyword_docs`,
//! used for FTS entity expansion and mirroring the scoring used by
//! `InMemoryKeywordStore` so both backends rank identically given the same corpus.

use crate::connection::SqliteStore;
use async_trait::async_trait;
use cuber_types::{KeywordStorage, StorageError};
use std::collections::HashMap;

const K1: f64 = 1.2;
const B: f64 = 0.75;

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl KeywordStorage for SqliteStore {
    async fn index(&self, id: &str, text: &str, memory_group: &str) -> Result<(), StorageError> {
        let terms = tokenize(text);
        let doc_length = terms.len() as i64;
        let mut term_counts: HashMap<String, i64> = HashMap::new();
        for t in &terms {
            *term_counts.entry(t.clone()).or_insert(0) += 1;
        }
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM keyword_terms WHERE doc_id = ?1 AND memory_group = ?2",
                rusqlite::params![id, memory_group],
            )?;
            tx.execute(
                "INSERT INTO keyword_docs (doc_id, memory_group, doc_length) VALUES (?1, ?2, ?3)
                 ON CONFLICT(doc_id) DO UPDATE SET doc_length = excluded.doc_length, memory_group = excluded.memory_group",
                rusqlite::params![id, memory_group, doc_length],
            )?;
            for (term, count) in &term_counts {
                tx.execute(
                    "INSERT INTO keyword_terms (term, doc_id, memory_group, term_freq)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(term, doc_id, memory_group) DO UPDATE SET term_freq = excluded.term_freq",
                    rusqlite::params![term, id, memory_group, count],
                )?;
            }
            tx.commit()
        })?;
        Ok(())
    }

    async fn remove(&self, id: &str, memory_group: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM keyword_terms WHERE doc_id = ?1 AND memory_group = ?2",
                rusqlite::params![id, memory_group],
            )?;
            tx.execute(
                "DELETE FROM keyword_docs WHERE doc_id = ?1 AND memory_group = ?2",
                rusqlite::params![id, memory_group],
            )?;
            tx.commit()
        })?;
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        memory_group: &str,
    ) -> Result<Vec<(String, f64)>, StorageError> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let (doc_count, avg_len): (i64, f64) = self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*), COALESCE(AVG(doc_length), 0.0) FROM keyword_docs WHERE memory_group = ?1",
                rusqlite::params![memory_group],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
        })?;
        if doc_count == 0 {
            return Ok(Vec::new());
        }
        let n = doc_count as f64;

        let mut scores: HashMap<String, f64> = HashMap::new();
        for term in &query_terms {
            let postings: Vec<(String, i64, i64)> = self.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT kt.doc_id, kt.term_freq, kd.doc_length
                     FROM keyword_terms kt JOIN keyword_docs kd
                       ON kt.doc_id = kd.doc_id AND kt.memory_group = kd.memory_group
                     WHERE kt.term = ?1 AND kt.memory_group = ?2",
                )?;
                let rows = stmt.query_map(rusqlite::params![term, memory_group], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })?;
            if postings.is_empty() {
                continue;
            }
            let df = postings.len() as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for (doc_id, tf, len) in postings {
                let tf = tf as f64;
                let len = len as f64;
                let norm = (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * len / avg_len.max(1.0)));
                *scores.entry(doc_id).or_insert(0.0) += idf * norm;
            }
        }

        let mut hits: Vec<(String, f64)> = scores.into_iter().collect();
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_ranks_by_bm25_descending() {
        let store = SqliteStore::open_in_memory(4).unwrap();
        store.index("a", "the quick brown fox jumps", "g").await.unwrap();
        store.index("b", "a slow brown bear", "g").await.unwrap();

        let hits = store.search("brown fox", 10, "g").await.unwrap();
        assert_eq!(hits[0].0, "a");
    }

    #[tokio::test]
    async fn search_is_scoped_to_memory_group() {
        let store = SqliteStore::open_in_memory(4).unwrap();
        store.index("a", "brown fox", "g1").await.unwrap();
        let hits = store.search("brown fox", 10, "g2").await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn remove_drops_doc_from_subsequent_search() {
        let store = SqliteStore::open_in_memory(4).unwrap();
        store.index("a", "brown fox", "g").await.unwrap();
        store.remove("a", "g").await.unwrap();
        let hits = store.search("brown fox", 10, "g").await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn reindexing_a_doc_replaces_its_postings() {
        let store = SqliteStore::open_in_memory(4).unwrap();
        store.index("a", "brown fox", "g").await.unwrap();
        store.index("a", "completely different text", "g").await.unwrap();
        let hits = store.search("brown fox", 10, "g").await.unwrap();
        assert!(hits.is_empty());
        let hits = store.search("completely different", 10, "g").await.unwrap();
        assert_eq!(hits[0].0, "a");
    }
}
