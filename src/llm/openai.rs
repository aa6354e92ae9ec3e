//! OpenAI-compatible chat-completion and embedding client
//!
//! Works against the hosted OpenAI API and against self-hosted servers that
//! speak the same protocol (vLLM). `base_url` includes the `/v1` prefix.

use async_trait::async_trait;
use serde::Deserialize;

use super::{ChatError, ChatModel, CompletionRequest, Embedder};

/// Hosted OpenAI API root
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

/// Client for `/chat/completions` and `/embeddings`
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    embedding_model: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            embedding_model: embedding_model.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<String, ChatError> {
        let endpoint = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ChatError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, ChatError> {
        let body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens
        });

        let text = self.post_json("/chat/completions", &body).await?;
        let parsed: CompletionResponse = serde_json::from_str(&text)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ChatError::EmptyResponse)
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ChatError> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": text
        });

        let raw = self.post_json("/embeddings", &body).await?;
        let parsed: EmbeddingResponse = serde_json::from_str(&raw)?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or(ChatError::EmptyResponse)
    }
}
