use std::sync::Arc;

use crate::llm::Embedder;
use crate::store::{FileStore, KnowledgeBase, VectorSearch};

/// Identity and data handles shared by one user's tools.
#[derive(Clone)]
pub struct ToolContext {
    pub user_id: String,
    /// Snapshot taken when the session was built.
    pub knowledge_bases: Vec<KnowledgeBase>,
    pub files: Arc<dyn FileStore>,
    pub search: Arc<dyn VectorSearch>,
    pub embedder: Arc<dyn Embedder>,
}

impl ToolContext {
    /// Collection searched for `scope`: a knowledge-base name maps to its
    /// collection, anything else is taken as a collection name.
    pub fn collection_for(&self, scope: &str) -> String {
        self.knowledge_bases
            .iter()
            .find(|kb| kb.name == scope)
            .map(|kb| kb.collection.clone())
            .unwrap_or_else(|| scope.to_string())
    }

    pub fn all_collections(&self) -> Vec<String> {
        self.knowledge_bases
            .iter()
            .map(|kb| kb.collection.clone())
            .collect()
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("user_id", &self.user_id)
            .field("knowledge_bases", &self.knowledge_bases)
            .finish_non_exhaustive()
    }
}
