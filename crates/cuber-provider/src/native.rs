//! Chat/embedding clients for the two families whose wire format diverges from OpenAI's:
//! Anthropic (`/messages`, system prompt is a top-level field) and Gemini
//! (`:generateContent`, content parts keyed by role `user`/`model`).

use crate::config::{ChatConfig, EmbeddingConfig};
use async_trait::async_trait;
use cuber_types::{ChatProvider, Embedder, ProviderError, TokenUsage};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

#[derive(Debug, serde::Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, serde::Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Chat completion client for the `anthropic` family.
pub struct AnthropicChatProvider {
    client: reqwest::Client,
    config: ChatConfig,
}

impl AnthropicChatProvider {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ChatProvider for AnthropicChatProvider {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, TokenUsage), ProviderError> {
        let request = AnthropicRequest {
            model: &self.config.model,
            system: system_prompt,
            messages: vec![AnthropicMessage {
                role: "user",
                content: user_prompt,
            }],
            max_tokens: self.config.max_output_tokens.unwrap_or(4096),
            temperature: self.config.temperature,
        };
        let call = async {
            let response = self
                .client
                .post(format!("{}/messages", self.config.resolved_base_url()))
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&request)
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
        let parsed: AnthropicResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        let content = parsed
            .content
            .into_iter()
            .map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");
        if content.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            })
            .unwrap_or_default();
        Ok((content, usage))
    }

    async fn verify(&self) -> Result<(), ProviderError> {
        self.generate("You are a health check.", "ping", &CancellationToken::new())
            .await
            .map(|_| ())
    }
}

#[derive(Debug, serde::Serialize)]
struct GeminiGenerateRequest<'a> {
    system_instruction: GeminiContent<'a>,
    contents: Vec<GeminiContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, serde::Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, serde::Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, serde::Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiGenerateResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiResponseContent,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize, Default)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize, Default)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
}

/// Chat completion client for the `gemini` family.
pub struct GeminiChatProvider {
    client: reqwest::Client,
    config: ChatConfig,
}

impl GeminiChatProvider {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ChatProvider for GeminiChatProvider {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, TokenUsage), ProviderError> {
        let request = GeminiGenerateRequest {
            system_instruction: GeminiContent {
                parts: vec![GeminiPart {
                    text: system_prompt,
                }],
            },
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: user_prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
        };
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.config.resolved_base_url(),
            self.config.model,
            self.config.api_key
        );
        let call = async {
            let response = self
                .client
                .post(url)
                .json(&request)
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
        let parsed: GeminiGenerateResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        let content = parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content.parts.into_iter().map(|p| p.text).collect::<String>())
            .ok_or(ProviderError::EmptyResponse)?;
        let usage = parsed
            .usage_metadata
            .map(|u| TokenUsage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();
        Ok((content, usage))
    }

    async fn verify(&self) -> Result<(), ProviderError> {
        self.generate("You are a health check.", "ping", &CancellationToken::new())
            .await
            .map(|_| ())
    }
}

#[derive(Debug, serde::Serialize)]
struct GeminiEmbedRequest<'a> {
    model: String,
    content: GeminiContent<'a>,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedResponse {
    embedding: GeminiEmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbeddingValues {
    values: Vec<f32>,
}

/// Embedding client for the `gemini` family.
pub struct GeminiEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

impl GeminiEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self, ProviderError> {
        config.validate_dimension()?;
        Ok(Self {
            client: reqwest::Client::new(),
            config,
        })
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> Result<(Vec<Vec<f32>>, TokenUsage), ProviderError> {
        let mut vectors = Vec::with_capacity(texts.len());
        let mut input_tokens = 0u32;
        for text in texts {
            input_tokens += (text.split_whitespace().count() as u32).max(1);
            let request = GeminiEmbedRequest {
                model: format!("models/{}", self.config.model),
                content: GeminiContent {
                    parts: vec![GeminiPart { text }],
                },
            };
            let url = format!(
                "{}/models/{}:embedContent?key={}",
                self.config.resolved_base_url(),
                self.config.model,
                self.config.api_key
            );
            let response = self
                .client
                .post(url)
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
            let parsed: GeminiEmbedResponse = serde_json::from_str(&body)
                .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
            if parsed.embedding.values.len() != self.config.dimension as usize {
                return Err(ProviderError::EmbeddingDimensionMismatch {
                    configured: self.config.dimension,
                    returned: parsed.embedding.values.len() as u32,
                });
            }
            vectors.push(parsed.embedding.values);
        }
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
