//! Narrow interfaces to the relational store and the vector-search service
//!
//! Tools only ever see these two traits. [`MemoryStore`] implements both for
//! the CLI and for tests; production deployments plug in their own backends.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::ChatError;

pub use memory::MemoryStore;

/// Error type for data-access calls
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("collection `{0}` does not exist")]
    UnknownCollection(String),

    #[error("vector has {actual} dimensions, collection expects {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("embedding failed: {0}")]
    Embedding(#[from] ChatError),

    #[error("{0}")]
    Backend(String),
}

/// A named group of documents backed by one vector collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub collection: String,
}

/// A stored file owned by one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Restricts a vector search to one user's chunks and optionally one topic.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFilter {
    pub user_id: String,
    /// Matches either topic level.
    pub topic: Option<String>,
}

impl SearchFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            topic: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn matches(&self, user_id: &str, topic_l1: Option<&str>, topic_l2: Option<&str>) -> bool {
        if user_id != self.user_id {
            return false;
        }
        match &self.topic {
            None => true,
            Some(topic) => topic_l1 == Some(topic.as_str()) || topic_l2 == Some(topic.as_str()),
        }
    }
}

/// One chunk returned by a vector search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    pub source_id: String,
    #[serde(default)]
    pub topic: Option<String>,
    pub score: f32,
}

/// Relational data: knowledge-base metadata and files.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn knowledge_bases(&self, user_id: &str) -> Result<Vec<KnowledgeBase>, StoreError>;

    /// Files owned by `user_id` whose name or title resembles `query`.
    async fn find_files(
        &self,
        user_id: &str,
        query: &str,
        file_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<FileRecord>, StoreError>;

    /// `None` when the file does not exist or belongs to someone else.
    async fn get_file(&self, user_id: &str, id: &str) -> Result<Option<FileRecord>, StoreError>;
}

/// Similarity search over embedded chunks.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>, StoreError>;
}
