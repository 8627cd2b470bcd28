//! Mock embedder and chat provider for tests: deterministic output, no network. Gated
//! behind `test-util` so it never ships in a production build.

use async_trait::async_trait;
use cuber_types::{ChatProvider, Embedder, ProviderError, TokenUsage};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio_util::sync::CancellationToken;

/// Mock embedder that returns deterministic unit-length vectors derived from a text hash.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(1536)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> Result<(Vec<Vec<f32>>, TokenUsage), ProviderError> {
        let mut out = Vec::with_capacity(texts.len());
        let mut input_tokens = 0u32;
        for text in texts {
            input_tokens += (text.split_whitespace().count() as u32).max(1);
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            let h = hasher.finish();
            let mut v = Vec::with_capacity(self.dimension);
            for i in 0..self.dimension {
                let x = ((h.wrapping_add(i as u64)).wrapping_mul(0x9e3779b97f4a7c15) >> 32) as f32
                    / u32::MAX as f32;
                v.push(x * 2.0 - 1.0);
            }
            let norm: f64 = v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
            if norm > 0.0 {
                for x in &mut v {
                    *x = (*x as f64 / norm) as f32;
                }
            }
            out.push(v);
        }
        Ok((
            out,
            TokenUsage {
                input_tokens,
                output_tokens: 0,
            },
        ))
    }

    fn dimension(&self) -> u32 {
        self.dimension as u32
    }

    async fn verify(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Mock chat provider that echoes a canned or templated response, for Absorb/Query tests
/// that need a `ChatProvider` without a live model.
pub struct MockChatProvider {
    response: String,
}

impl MockChatProvider {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }

    /// A mock tuned for GraphExtract: always returns a minimal valid `{nodes, edges}` JSON
    /// object wrapped in prose, matching what the extraction sanitizer expects to strip.
    pub fn graph_extraction_stub() -> Self {
        Self::new(
            r#"Here is the extracted graph: {"nodes":[{"id":"alpha","type":"entity","name":"Alpha"}],"edges":[]}"#,
        )
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    async fn generate(
        &self,
        _system_prompt: &str,
        user_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, TokenUsage), ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        Ok((
            self.response.clone(),
            TokenUsage {
                input_tokens: (user_prompt.split_whitespace().count() as u32).max(1),
                output_tokens: (self.response.split_whitespace().count() as u32).max(1),
            },
        ))
    }

    async fn verify(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
