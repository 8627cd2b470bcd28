//! In-memory `ContentStorage` reference implementation, mirroring the hash-dedup
//! and chunk-ordering semantics of the SQLite-backed store in `cuber-sqlite` for
//! isolated unit tests of Absorb above the storage seam.

use cuber_types::{Chunk, ContentStorage, Data, Document, StorageError};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct Tables {
    data: HashMap<String, Data>,
    /// `(content_hash, memory_group) -> data id`, the dedup index Absorb checks first.
    data_by_hash: HashMap<(String, String), String>,
    documents: HashMap<String, Document>,
    chunks: HashMap<String, Chunk>,
}

pub struct InMemoryContentStore {
    tables: RwLock<Tables>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ContentStorage for InMemoryContentStore {
    async fn find_data_by_hash(
        &self,
        content_hash: &str,
        memory_group: &str,
    ) -> Result<Option<Data>, StorageError> {
        let guard = self
            .tables
            .read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(guard
            .data_by_hash
            .get(&(content_hash.to_string(), memory_group.to_string()))
            .and_then(|id| guard.data.get(id))
            .cloned())
    }

    async fn insert_data(&self, data: &Data) -> Result<(), StorageError> {
        let mut guard = self
            .tables
            .write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        guard.data_by_hash.insert(
            (data.content_hash.clone(), data.memory_group.clone()),
            data.id.clone(),
        );
        guard.data.insert(data.id.clone(), data.clone());
        Ok(())
    }

    async fn insert_document(&self, document: &Document) -> Result<(), StorageError> {
        let mut guard = self
            .tables
            .write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        guard.documents.insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<(), StorageError> {
        let mut guard = self
            .tables
            .write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        for chunk in chunks {
            guard.chunks.insert(chunk.id.clone(), chunk.clone());
        }
        Ok(())
    }

    async fn get_chunks_by_ids(
        &self,
        ids: &[String],
        memory_group: &str,
    ) -> Result<Vec<Chunk>, StorageError> {
        let guard = self
            .tables
            .read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(ids
            .iter()
            .filter_map(|id| guard.chunks.get(id))
            .filter(|c| c.memory_group == memory_group)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn data(hash: &str, group: &str) -> Data {
        Data {
            id: format!("data-{hash}"),
            memory_group: group.to_string(),
            name: "doc.txt".to_string(),
            raw_location: "raw://doc.txt".to_string(),
            original_location: None,
            extension: "txt".to_string(),
            mime_type: "text/plain".to_string(),
            content_hash: hash.to_string(),
            owner_id: "owner-1".to_string(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn duplicate_content_hash_is_found_within_its_group_only() {
        let store = InMemoryContentStore::new();
        store.insert_data(&data("hash-1", "g")).await.unwrap();
        assert!(store.find_data_by_hash("hash-1", "g").await.unwrap().is_some());
        assert!(store
            .find_data_by_hash("hash-1", "other")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn get_chunks_by_ids_is_scoped_to_memory_group() {
        let store = InMemoryContentStore::new();
        let chunk = Chunk {
            id: "c0".into(),
            memory_group: "g".into(),
            document_id: "doc-1".into(),
            text: "a".into(),
            token_count: 1,
            chunk_index: 0,
            embedding: vec![],
        };
        store.insert_chunks(&[chunk]).await.unwrap();
        assert_eq!(
            store
                .get_chunks_by_ids(&["c0".to_string()], "g")
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(store
            .get_chunks_by_ids(&["c0".to_string()], "other")
            .await
            .unwrap()
            .is_empty());
    }
}
