//! Provider configuration: family tags, per-request config, and the closed dimension table.

use serde::{Deserialize, Serialize};

/// Provider families the façade understands. Families marked OpenAI-wire-compatible in
/// [`ProviderFamily::base_url_for`] reuse [`crate::openai::OpenAiChatProvider`] /
/// [`crate::openai::OpenAiEmbedder`] by swapping the base URL rather than growing a new
/// client implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    OpenAi,
    Gemini,
    Anthropic,
    Ollama,
    Deepseek,
    Openrouter,
    Qwen,
}

impl ProviderFamily {
    /// Whether this family speaks the OpenAI chat/embeddings wire format and can be
    /// served by the OpenAI client with only a base URL swap.
    pub fn is_openai_wire_compatible(&self) -> bool {
        !matches!(self, ProviderFamily::Anthropic | ProviderFamily::Gemini)
    }

    /// Default base URL when the caller does not supply one.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderFamily::OpenAi => "https://api.openai.com/v1",
            ProviderFamily::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            ProviderFamily::Anthropic => "https://api.anthropic.com/v1",
            ProviderFamily::Ollama => "http://localhost:11434/v1",
            ProviderFamily::Deepseek => "https://api.deepseek.com/v1",
            ProviderFamily::Openrouter => "https://openrouter.ai/api/v1",
            ProviderFamily::Qwen => "https://dashscope.aliyuncs.com/compatible-mode/v1",
        }
    }
}

/// Per-request chat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub family: ProviderFamily,
    pub model: String,
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.2
}

impl ChatConfig {
    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.family.default_base_url().to_string())
    }
}

/// Per-request embedding configuration. Rejected at construction if `dimension` doesn't
/// match the family/model's known fixed dimension; unknown models pass through unchecked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub family: ProviderFamily,
    pub model: String,
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    pub dimension: u32,
}

impl EmbeddingConfig {
    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.family.default_base_url().to_string())
    }

    /// Validate `dimension` against the closed table. `Ok(())` for unknown models.
    pub fn validate_dimension(&self) -> Result<(), cuber_types::ProviderError> {
        if let Some(expected) = known_embedding_dimension(self.family, &self.model) {
            if expected != self.dimension {
                return Err(cuber_types::ProviderError::EmbeddingDimensionMismatch {
                    configured: self.dimension,
                    returned: expected,
                });
            }
        }
        Ok(())
    }
}

/// Closed table of known fixed embedding dimensions. Returns `None` for unrecognized
/// models, which the caller lets through unchecked.
pub fn known_embedding_dimension(family: ProviderFamily, model: &str) -> Option<u32> {
    match (family, model) {
        (ProviderFamily::OpenAi, "text-embedding-3-small") => Some(1536),
        (ProviderFamily::OpenAi, "text-embedding-3-large") => Some(3072),
        (ProviderFamily::OpenAi, "text-embedding-ada-002") => Some(1536),
        (ProviderFamily::Gemini, "embedding-001") => Some(768),
        (ProviderFamily::Gemini, "text-embedding-004") => Some(768),
        (ProviderFamily::Qwen, "text-embedding-v2") => Some(1536),
        (ProviderFamily::Deepseek, _) => None,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_rejects_wrong_dimension() {
        let cfg = EmbeddingConfig {
            family: ProviderFamily::OpenAi,
            model: "text-embedding-3-small".to_string(),
            api_key: "k".to_string(),
            base_url: None,
            dimension: 768,
        };
        assert!(cfg.validate_dimension().is_err());
    }

    #[test]
    fn unknown_model_passes_through() {
        let cfg = EmbeddingConfig {
            family: ProviderFamily::Ollama,
            model: "nomic-embed-text".to_string(),
            api_key: "k".to_string(),
            base_url: None,
            dimension: 4096,
        };
        assert!(cfg.validate_dimension().is_ok());
    }

    #[test]
    fn openai_wire_compatible_families() {
        assert!(ProviderFamily::Ollama.is_openai_wire_compatible());
        assert!(ProviderFamily::Deepseek.is_openai_wire_compatible());
        assert!(!ProviderFamily::Anthropic.is_openai_wire_compatible());
        assert!(!ProviderFamily::Gemini.is_openai_wire_compatible());
    }
}
