//! Absorb: `[Chunk -> GraphExtract -> Store]`, content-hash deduped, followed by
//! Memify's Phase A meta-cognition pass.

use crate::chunk::{chunk_text, ChunkInput};
use crate::extract::run_extract;
use crate::memify::{run_meta_cognition, MetaCognitionOutcome};
use crate::store::run_store;
use chrono::Utc;
use cuber_pipeline::{CancellationToken, FnTask, Pipeline, PipelineError};
use cuber_types::{ChatProvider, CubeStorage, Data, Document, Embedder, TokenUsage};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AbsorbError {
    #[error("storage: {0}")]
    Storage(#[from] cuber_types::StorageError),
    #[error("pipeline: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("meta-cognition: {0}")]
    Memify(#[from] cuber_types::MemifyError),
}

#[derive(Debug, Clone)]
pub struct AbsorbRequest {
    pub memory_group: String,
    pub owner_id: String,
    pub content: String,
    pub name: String,
    pub extension: String,
    pub mime_type: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub is_en: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AbsorbOutcome {
    /// True if `(content_hash, memory_group)` already existed; the pipeline never ran.
    pub duplicate: bool,
    pub document_id: Option<String>,
    pub chunk_count: usize,
    pub rendering: Option<String>,
    pub usage: TokenUsage,
}

/// Similarity threshold above which a freshly extracted knowledge text is considered
/// to resolve an outstanding Unknown.
const UNKNOWN_RESOLUTION_THRESHOLD: f64 = 0.3;

pub struct AbsorbEngine<S, E: ?Sized, C: ?Sized> {
    storage: Arc<S>,
    embedder: Arc<E>,
    chat: Arc<C>,
}

impl<S, E, C> AbsorbEngine<S, E, C>
where
    S: CubeStorage + 'static,
    E: Embedder + ?Sized + 'static,
    C: ChatProvider + ?Sized + 'static,
{
    pub fn new(storage: Arc<S>, embedder: Arc<E>, chat: Arc<C>) -> Self {
        Self {
            storage,
            embedder,
            chat,
        }
    }

    pub async fn absorb(
        &self,
        req: AbsorbRequest,
        cancel: CancellationToken,
    ) -> Result<AbsorbOutcome, AbsorbError> {
        let content_hash = {
            let mut hasher = Sha256::new();
            hasher.update(req.content.as_bytes());
            hex::encode(hasher.finalize())
        };

        if self
            .storage
            .find_data_by_hash(&content_hash, &req.memory_group)
            .await?
            .is_some()
        {
            return Ok(AbsorbOutcome {
                duplicate: true,
                ..Default::default()
            });
        }

        let now = Utc::now().to_rfc3339();
        let data_id = Uuid::new_v4().to_string();
        let data = Data {
            id: data_id.clone(),
            memory_group: req.memory_group.clone(),
            name: req.name.clone(),
            raw_location: format!("raw://{data_id}"),
            original_location: None,
            extension: req.extension.clone(),
            mime_type: req.mime_type.clone(),
            content_hash,
            owner_id: req.owner_id.clone(),
            created_at: now,
        };
        self.storage.insert_data(&data).await?;

        let document_id = Uuid::new_v4().to_string();
        let document = Document {
            id: document_id.clone(),
            memory_group: req.memory_group.clone(),
            data_id,
            text: req.content.clone(),
            metadata: HashMap::new(),
        };
        self.storage.insert_document(&document).await?;

        let pipeline = self.build_pipeline(req.memory_group.clone(), req.is_en);
        let pipeline_input = ChunkInput {
            document_id: document_id.clone(),
            memory_group: req.memory_group.clone(),
            text: req.content,
            chunk_size: req.chunk_size,
            chunk_overlap: req.chunk_overlap,
        };

        let outcome: cuber_pipeline::PipelineOutcome<crate::store::StoreOutput> =
            pipeline.run(pipeline_input, cancel).await;
        let mut usage = outcome.usage;
        let store_output = outcome.result?;

        let MetaCognitionOutcome {
            usage: phase_a_usage,
            ..
        } = run_meta_cognition(
            self.storage.as_ref(),
            self.embedder.as_ref(),
            &req.memory_group,
            &document_id,
            &store_output.extracted_names,
            &store_output.unknowns,
            UNKNOWN_RESOLUTION_THRESHOLD,
        )
        .await?;
        usage.add(phase_a_usage);

        Ok(AbsorbOutcome {
            duplicate: false,
            document_id: Some(document_id),
            chunk_count: store_output.chunks.len(),
            rendering: Some(store_output.rendering),
            usage,
        })
    }

    fn build_pipeline(&self, memory_group: String, is_en: bool) -> Pipeline {
        let chat = Arc::clone(&self.chat);
        let extract_group = memory_group.clone();
        let extract_task = FnTask::new(
            "graph_extract",
            move |chunks: Vec<cuber_types::Chunk>, cancel| {
                let chat = Arc::clone(&chat);
                let memory_group = extract_group.clone();
                async move {
                    let (output, usage) =
                        run_extract(chat.as_ref(), chunks, &memory_group, is_en, &cancel)
                            .await
                            .map_err(|e| PipelineError::TaskFailed {
                                task: "graph_extract",
                                source: Box::new(e),
                            })?;
                    Ok((output, usage))
                }
            },
        );

        let storage = Arc::clone(&self.storage);
        let embedder = Arc::clone(&self.embedder);
        let store_group = memory_group;
        let store_task = FnTask::new(
            "store",
            move |extraction: crate::extract::GraphExtractOutput, _cancel| {
                let storage = Arc::clone(&storage);
                let embedder = Arc::clone(&embedder);
                let memory_group = store_group.clone();
                async move {
                    let (output, usage) =
                        run_store(storage.as_ref(), embedder.as_ref(), extraction, &memory_group)
                            .await
                            .map_err(|e| PipelineError::TaskFailed {
                                task: "store",
                                source: Box::new(e),
                            })?;
                    Ok((output, usage))
                }
            },
        );

        let chunk_task = FnTask::new("chunk", move |input: ChunkInput, _cancel| async move {
            let chunks = chunk_text(input).map_err(|e| PipelineError::TaskFailed {
                task: "chunk",
                source: Box::new(e),
            })?;
            Ok((chunks, TokenUsage::default()))
        });

        Pipeline::new(vec![Box::new(chunk_task), Box::new(extract_task), Box::new(store_task)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuber_provider::mock::{MockChatProvider, MockEmbedder};
    use cuber_sqlite::SqliteStore;

    fn engine() -> AbsorbEngine<SqliteStore, MockEmbedder, MockChatProvider> {
        AbsorbEngine::new(
            Arc::new(SqliteStore::open_in_memory(4).unwrap()),
            Arc::new(MockEmbedder::new(4)),
            Arc::new(MockChatProvider::graph_extraction_stub()),
        )
    }

    fn request(content: &str) -> AbsorbRequest {
        AbsorbRequest {
            memory_group: "g".into(),
            owner_id: "owner-1".into(),
            content: content.into(),
            name: "doc.txt".into(),
            extension: "txt".into(),
            mime_type: "text/plain".into(),
            chunk_size: 40,
            chunk_overlap: 5,
            is_en: true,
        }
    }

    #[tokio::test]
    async fn absorbing_new_content_chunks_extracts_and_stores() {
        let engine = engine();
        let content = "Alpha is a star. ".repeat(5);
        let outcome = engine
            .absorb(request(&content), CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.duplicate);
        assert!(outcome.chunk_count > 0);
        assert!(outcome.document_id.is_some());
    }

    #[tokio::test]
    async fn repeat_absorb_of_identical_content_short_circuits() {
        let engine = engine();
        let content = "Beta orbits Gamma. ".repeat(5);
        let first = engine
            .absorb(request(&content), CancellationToken::new())
            .await
            .unwrap();
        let second = engine
            .absorb(request(&content), CancellationToken::new())
            .await
            .unwrap();
        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(second.usage.input_tokens, 0);
        assert_eq!(second.usage.output_tokens, 0);
    }
}
