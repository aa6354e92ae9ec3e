//! Ollama API client for chat completion and embeddings

use async_trait::async_trait;
use serde::Deserialize;

use super::{ChatError, ChatMessage, ChatModel, CompletionRequest, Embedder};

/// Default Ollama server address
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Response from /api/chat
#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
    #[serde(default)]
    eval_count: u32,
    #[serde(default)]
    eval_duration: u64,
}

/// Response from /api/embeddings
#[derive(Debug, Clone, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Client for interacting with Ollama's HTTP API
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    embedding_model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new Ollama client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the Ollama server (e.g., "http://localhost:11434")
    /// * `embedding_model` - Model used by [`Embedder::embed`] (e.g., "nomic-embed-text")
    pub fn new(base_url: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
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
        let response = self.client.post(&endpoint).json(body).send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ChatError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.is_empty() {
            return Err(ChatError::EmptyResponse);
        }
        Ok(text)
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, ChatError> {
        let body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": false,
            "options": {
                "temperature": 0.0,
                "num_predict": request.max_tokens
            }
        });

        let text = self.post_json("/api/chat", &body).await?;
        let chat_response: ChatResponse = serde_json::from_str(&text)?;
        tracing::debug!(
            model = request.model,
            eval_count = chat_response.eval_count,
            eval_duration_ns = chat_response.eval_duration,
            "Ollama chat completed"
        );
        Ok(chat_response.message.content)
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ChatError> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "prompt": text
        });

        let raw = self.post_json("/api/embeddings", &body).await?;
        let response: EmbeddingResponse = serde_json::from_str(&raw)?;
        if response.embedding.is_empty() {
            return Err(ChatError::EmptyResponse);
        }
        Ok(response.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = OllamaClient::new("http://localhost:11434/", "nomic-embed-text");
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_chat_response_parsing() {
        let raw = r#"{"model":"qwen3","message":{"role":"assistant","content":"hi"},"done":true,"eval_count":3}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.message.content, "hi");
        assert_eq!(parsed.eval_count, 3);
        assert_eq!(parsed.eval_duration, 0);
    }
}
