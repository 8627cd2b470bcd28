//! `ContentStorage`: Data/Document/Chunk persistence and the content-hash dedup check
//! that makes repeat Absorb calls idempotent.
//!
//! Inserting a Document records the `HAS_DOCUMENT` structural edge; inserting Chunks
//! records `HAS_CHUNK` for each and `NEXT_CHUNK` between consecutive chunks ordered by
//! `chunk_index`, so traversal can bridge a Data row down to its chunks without the
//! caller re-deriving the chain.

use crate::connection::{decode_vector, encode_vector, SqliteStore};
use async_trait::async_trait;
use cuber_types::{Chunk, ContentStorage, Data, Document, StorageError};

fn row_to_chunk(row: &rusqlite::Row) -> rusqlite::Result<Chunk> {
    let embedding_blob: Option<Vec<u8>> = row.get(5)?;
    Ok(Chunk {
        id: row.get(0)?,
        memory_group: row.get(1)?,
        document_id: row.get(2)?,
        text: row.get(3)?,
        token_count: row.get::<_, i64>(4)? as u32,
        chunk_index: row.get::<_, i64>(6)? as u32,
        embedding: embedding_blob.map(|b| decode_vector(&b)).unwrap_or_default(),
    })
}

#[async_trait]
impl ContentStorage for SqliteStore {
    async fn find_data_by_hash(
        &self,
        content_hash: &str,
        memory_group: &str,
    ) -> Result<Option<Data>, StorageError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, memory_group, name, raw_location, original_location, extension,
                        mime_type, content_hash, owner_id, created_at
                 FROM data WHERE content_hash = ?1 AND memory_group = ?2",
                rusqlite::params![content_hash, memory_group],
                |row| {
                    Ok(Data {
                        id: row.get(0)?,
                        memory_group: row.get(1)?,
                        name: row.get(2)?,
                        raw_location: row.get(3)?,
                        original_location: row.get(4)?,
                        extension: row.get(5)?,
                        mime_type: row.get(6)?,
                        content_hash: row.get(7)?,
                        owner_id: row.get(8)?,
                        created_at: row.get(9)?,
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })
        })
    }

    async fn insert_data(&self, data: &Data) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO data (id, memory_group, name, raw_location, original_location,
                                    extension, mime_type, content_hash, owner_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    data.id,
                    data.memory_group,
                    data.name,
                    data.raw_location,
                    data.original_location,
                    data.extension,
                    data.mime_type,
                    data.content_hash,
                    data.owner_id,
                    data.created_at,
                ],
            )
        })?;
        Ok(())
    }

    async fn insert_document(&self, document: &Document) -> Result<(), StorageError> {
        let metadata = serde_json::to_string(&document.metadata)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO documents (id, memory_group, data_id, text, metadata) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![document.id, document.memory_group, document.data_id, document.text, metadata],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO structural_edges (source, target, edge_type, memory_group)
                 VALUES (?1, ?2, 'HAS_DOCUMENT', ?3)",
                rusqlite::params![document.data_id, document.id, document.memory_group],
            )?;
            tx.commit()
        })?;
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut ordered: Vec<&Chunk> = chunks.iter().collect();
            ordered.sort_by_key(|c| c.chunk_index);
            for chunk in &ordered {
                let embedding = if chunk.embedding.is_empty() {
                    None
                } else {
                    Some(encode_vector(&chunk.embedding))
                };
                tx.execute(
                    "INSERT INTO chunks (id, memory_group, document_id, text, token_count, chunk_index, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET text = excluded.text, embedding = COALESCE(excluded.embedding, chunks.embedding)",
                    rusqlite::params![
                        chunk.id,
                        chunk.memory_group,
                        chunk.document_id,
                        chunk.text,
                        chunk.token_count,
                        chunk.chunk_index,
                        embedding,
                    ],
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO structural_edges (source, target, edge_type, memory_group)
                     VALUES (?1, ?2, 'HAS_CHUNK', ?3)",
                    rusqlite::params![chunk.document_id, chunk.id, chunk.memory_group],
                )?;
            }
            for pair in ordered.windows(2) {
                let (prev, next) = (pair[0], pair[1]);
                tx.execute(
                    "INSERT OR IGNORE INTO structural_edges (source, target, edge_type, memory_group)
                     VALUES (?1, ?2, 'NEXT_CHUNK', ?3)",
                    rusqlite::params![prev.id, next.id, prev.memory_group],
                )?;
            }
            tx.commit()
        })?;
        Ok(())
    }

    async fn get_chunks_by_ids(
        &self,
        ids: &[String],
        memory_group: &str,
    ) -> Result<Vec<Chunk>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT id, memory_group, document_id, text, token_count, embedding, chunk_index
             FROM chunks WHERE memory_group = ? AND id IN ({placeholders})"
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut params: Vec<&dyn rusqlite::ToSql> = vec![&memory_group];
            params.extend(ids.iter().map(|s| s as &dyn rusqlite::ToSql));
            let rows = stmt.query_map(params.as_slice(), row_to_chunk)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
    }
}

/// Extra read used by Absorb/Memify beyond the `ContentStorage` trait surface: the
/// `HAS_DOCUMENT`/`HAS_CHUNK`/`NEXT_CHUNK` rows recorded alongside content inserts.
impl SqliteStore {
    pub fn structural_edges(
        &self,
        memory_group: &str,
    ) -> Result<Vec<(String, String, String)>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT source, target, edge_type FROM structural_edges WHERE memory_group = ?1",
            )?;
            let rows = stmt.query_map(rusqlite::params![memory_group], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
    }

    pub fn chunks_by_document(
        &self,
        document_id: &str,
        memory_group: &str,
    ) -> Result<Vec<Chunk>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, memory_group, document_id, text, token_count, embedding, chunk_index
                 FROM chunks WHERE document_id = ?1 AND memory_group = ?2 ORDER BY chunk_index",
            )?;
            let rows = stmt.query_map(rusqlite::params![document_id, memory_group], row_to_chunk)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn data(hash: &str, group: &str) -> Data {
        Data {
            id: uuid::Uuid::new_v4().to_string(),
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
    async fn duplicate_content_hash_short_circuits() {
        let store = SqliteStore::open_in_memory(4).unwrap();
        let d = data("hash-1", "g");
        store.insert_data(&d).await.unwrap();
        let found = store.find_data_by_hash("hash-1", "g").await.unwrap();
        assert_eq!(found.unwrap().id, d.id);
        assert!(store.find_data_by_hash("hash-1", "other-group").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inserting_chunks_links_next_chunk_in_index_order() {
        let store = SqliteStore::open_in_memory(4).unwrap();
        let d = data("hash-2", "g");
        store.insert_data(&d).await.unwrap();
        let doc = Document {
            id: "doc-1".to_string(),
            memory_group: "g".to_string(),
            data_id: d.id.clone(),
            text: "full text".to_string(),
            metadata: Default::default(),
        };
        store.insert_document(&doc).await.unwrap();
        let chunks = vec![
            Chunk {
                id: "c0".into(),
                memory_group: "g".into(),
                document_id: "doc-1".into(),
                text: "a".into(),
                token_count: 1,
                chunk_index: 0,
                embedding: vec![],
            },
            Chunk {
                id: "c1".into(),
                memory_group: "g".into(),
                document_id: "doc-1".into(),
                text: "b".into(),
                token_count: 1,
                chunk_index: 1,
                embedding: vec![],
            },
        ];
        store.insert_chunks(&chunks).await.unwrap();
        let edges = store.structural_edges("g").unwrap();
        assert!(edges.contains(&("doc-1".to_string(), "c0".to_string(), "HAS_CHUNK".to_string())));
        assert!(edges.contains(&("c0".to_string(), "c1".to_string(), "NEXT_CHUNK".to_string())));
    }
}
