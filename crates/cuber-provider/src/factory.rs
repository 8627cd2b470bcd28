//! Constructs the right concrete client for a configuration's provider family.

use crate::config::{ChatConfig, EmbeddingConfig, ProviderFamily};
use crate::native::{AnthropicChatProvider, GeminiChatProvider, GeminiEmbedder};
use crate::openai::{OpenAiChatProvider, OpenAiEmbedder};
use cuber_types::{ChatProvider, Embedder, ProviderError};
use std::sync::Arc;

/// Build a [`ChatProvider`] for `config.family`. OpenAI-wire-compatible families
/// (ollama, deepseek, openrouter, qwen, and openai itself) share one client with a
/// swapped base URL; anthropic and gemini get their native clients.
pub fn build_chat_provider(config: ChatConfig) -> Arc<dyn ChatProvider> {
    match config.family {
        ProviderFamily::Anthropic => Arc::new(AnthropicChatProvider::new(config)),
        ProviderFamily::Gemini => Arc::new(GeminiChatProvider::new(config)),
        _ => Arc::new(OpenAiChatProvider::new(config)),
    }
}

/// Build an [`Embedder`] for `config.family`, validating the declared dimension against
/// the closed table first.
pub fn build_embedder(config: EmbeddingConfig) -> Result<Arc<dyn Embedder>, ProviderError> {
    match config.family {
        ProviderFamily::Gemini => Ok(Arc::new(GeminiEmbedder::new(config)?)),
        _ => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_embedder_rejects_bad_dimension() {
        let cfg = EmbeddingConfig {
            family: ProviderFamily::OpenAi,
            model: "text-embedding-3-small".to_string(),
            api_key: "k".to_string(),
            base_url: None,
            dimension: 1,
        };
        assert!(build_embedder(cfg).is_err());
    }
}
