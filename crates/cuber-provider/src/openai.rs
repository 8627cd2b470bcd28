//! OpenAI-wire-compatible chat and embedding clients.
//!
//! Families other than `anthropic`/`gemini` are served by these two clients with only a
//! base URL swap.

use crate::config::{ChatConfig, EmbeddingConfig};
use async_trait::async_trait;
use cuber_types::{ChatProvider, Embedder, ProviderError, TokenUsage};
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, serde::Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
}

#[derive(Debug, serde::Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Chat completion client speaking the OpenAI `/chat/completions` wire format.
pub struct OpenAiChatProvider {
    client: reqwest::Client,
    config: ChatConfig,
}

impl OpenAiChatProvider {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.resolved_base_url())
    }

    async fn call(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<(String, TokenUsage), ProviderError> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            max_tokens: self.config.max_output_tokens,
            temperature: self.config.temperature,
        };

        let mut req = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }

        let call = async {
            let response = req
                .send()
                .await
                .map_err(|e| ProviderError::Request(e.to_string()))?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| ProviderError::Request(e.to_string()))?;
            Ok::<_, ProviderError>((status, body))
        };
        let (status, body) = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = call => result?,
        };
        if !status.is_success() {
            return Err(ProviderError::Request(format!("status {status}: {body}")));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(ProviderError::EmptyResponse)?;
        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok((content, usage))
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatProvider {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, TokenUsage), ProviderError> {
        self.call(system_prompt, user_prompt, None, cancel).await
    }

    async fn verify(&self) -> Result<(), ProviderError> {
        self.call(
            "You are a health check.",
            "ping",
            Some(VERIFY_TIMEOUT),
            &CancellationToken::new(),
        )
        .await
        .map(|_| ())
    }
}

#[derive(Debug, serde::Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
    #[serde(default)]
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct EmbeddingUsage {
    #[serde(default)]
    prompt_tokens: u32,
}

/// Embedding client speaking the OpenAI `/embeddings` wire format.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

impl OpenAiEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self, ProviderError> {
        config.validate_dimension()?;
        Ok(Self {
            client: reqwest::Client::new(),
            config,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.config.resolved_base_url())
    }

    fn local_token_count(texts: &[String]) -> u32 {
        texts
            .iter()
            .map(|t| (t.split_whitespace().count() as u32).max(1))
            .sum()
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> Result<(Vec<Vec<f32>>, TokenUsage), ProviderError> {
        if texts.is_empty() {
            return Ok((Vec::new(), TokenUsage::default()));
        }
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        };
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(ProviderError::Request(format!("status {status}: {body}")));
        }
        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        if parsed.data.len() != texts.len() {
            return Err(ProviderError::MalformedResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        for item in &parsed.data {
            if item.embedding.len() != self.config.dimension as usize {
                return Err(ProviderError::EmbeddingDimensionMismatch {
                    configured: self.config.dimension,
                    returned: item.embedding.len() as u32,
                });
            }
        }
        let input_tokens = parsed
            .usage
            .as_ref()
            .map(|u| u.prompt_tokens)
            .filter(|&t| t > 0)
            .unwrap_or_else(|| Self::local_token_count(texts));
        let vectors = parsed.data.into_iter().map(|d| d.embedding).collect();
        Ok((
            vectors,
            TokenUsage {
                input_tokens,
                output_tokens: 0,
            },
        ))
    }

    fn dimension(&self) -> u32 {
        self.config.dimension
    }

    async fn verify(&self) -> Result<(), ProviderError> {
        self.embed_batch(&["ping".to_string()]).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderFamily;

    #[test]
    fn local_token_count_counts_words() {
        let texts = vec!["hello world".to_string(), "one".to_string()];
        assert_eq!(OpenAiEmbedder::local_token_count(&texts), 3);
    }

    #[test]
    fn embedder_rejects_dimension_mismatch_at_construction() {
        let cfg = EmbeddingConfig {
            family: ProviderFamily::OpenAi,
            model: "text-embedding-3-small".to_string(),
            api_key: "k".to_string(),
            base_url: None,
            dimension: 42,
        };
        assert!(OpenAiEmbedder::new(cfg).is_err());
    }
}
