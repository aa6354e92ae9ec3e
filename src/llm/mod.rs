//! Model-completion and embedding clients
//!
//! The engine talks to language models only through the [`ChatModel`] and
//! [`Embedder`] traits. Two HTTP backends are provided:
//!
//! - `ollama` - Ollama's `/api/chat` and `/api/embeddings`
//! - `openai` - any OpenAI-compatible server (hosted OpenAI, vLLM)
//!
//! ```text
//! Engine ──complete()──► ChatModel ──HTTP──► Ollama / OpenAI / vLLM
//! search_docs ──embed()──► Embedder ──HTTP──┘
//! ```

pub mod ollama;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{LlmBackend, LlmSettings};

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

/// Author of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a chat conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One completion call: which model, what history, how long the reply may be
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub max_tokens: u32,
}

/// Error type for model and embedding calls
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("model server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("empty response from model")]
    EmptyResponse,
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
}

/// A chat-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Return the text of the first choice for `request`.
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, ChatError>;
}

/// A text-embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ChatError>;
}

/// The pair of clients selected by [`LlmSettings`]
#[derive(Clone)]
pub struct ModelBackend {
    pub chat: Arc<dyn ChatModel>,
    pub embedder: Arc<dyn Embedder>,
}

impl ModelBackend {
    /// Build clients for the configured backend.
    ///
    /// `vllm` without a URL falls back to hosted OpenAI.
    pub fn from_settings(settings: &LlmSettings) -> Self {
        match settings.backend {
            LlmBackend::Ollama => {
                let client = Arc::new(OllamaClient::new(
                    settings.ollama_url.clone(),
                    settings.embedding_model.clone(),
                ));
                Self {
                    chat: client.clone(),
                    embedder: client,
                }
            }
            LlmBackend::Vllm if !settings.vllm_url.is_empty() => {
                let client = Arc::new(OpenAiClient::new(
                    settings.vllm_url.clone(),
                    "dummy",
                    settings.embedding_model.clone(),
                ));
                Self {
                    chat: client.clone(),
                    embedder: client,
                }
            }
            LlmBackend::OpenAi | LlmBackend::Vllm => {
                let client = Arc::new(OpenAiClient::new(
                    openai::DEFAULT_OPENAI_URL,
                    settings.openai_api_key.clone(),
                    settings.embedding_model.clone(),
                ));
                Self {
                    chat: client.clone(),
                    embedder: client,
                }
            }
        }
    }
}

/// Run a completion with an optional deadline.
pub async fn complete_with_timeout(
    model: &dyn ChatModel,
    request: CompletionRequest<'_>,
    timeout: Option<Duration>,
) -> Result<String, ChatError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, model.complete(request))
            .await
            .map_err(|_| ChatError::Timeout(limit))?,
        None => model.complete(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_serialization() {
        let msg = ChatMessage::user("test message");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"test message"}"#);
    }

    #[test]
    fn test_role_constructors() {
        assert_eq!(ChatMessage::system("s").role, Role::System);
        assert_eq!(ChatMessage::assistant("a").role, Role::Assistant);
    }

    struct Slow;

    #[async_trait]
    impl ChatModel for Slow {
        async fn complete(&self, _request: CompletionRequest<'_>) -> Result<String, ChatError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn test_timeout_maps_to_chat_error() {
        let request = CompletionRequest {
            model: "m",
            messages: &[],
            max_tokens: 10,
        };
        let result = complete_with_timeout(&Slow, request, Some(Duration::from_millis(10))).await;
        assert!(matches!(result, Err(ChatError::Timeout(_))));
    }
}
