//! Provider-agnostic embedder and chat completion façade.
//!
//! One uniform surface over seven provider families. OpenAI-wire-compatible families
//! (ollama, deepseek, openrouter, qwen, plus openai itself) are served by
//! [`openai::OpenAiChatProvider`] / [`openai::OpenAiEmbedder`] with only a base URL
//! swap; anthropic and gemini get their own clients in [`native`].

mod config;
mod factory;
mod native;
mod openai;

#[cfg(feature = "test-util")]
pub mod mock;

pub use config::{known_embedding_dimension, ChatConfig, EmbeddingConfig, ProviderFamily};
pub use factory::{build_chat_provider, build_embedder};
pub use native::{AnthropicChatProvider, GeminiChatProvider, GeminiEmbedder};
pub use openai::{OpenAiChatProvider, OpenAiEmbedder};

pub use cuber_types::{ChatProvider, Embedder, ProviderError, TokenUsage};

#[cfg(feature = "test-util")]
pub use mock::{MockChatProvider, MockEmbedder};
