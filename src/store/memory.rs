//! In-memory [`FileStore`] and [`VectorSearch`]
//!
//! Loadable from a JSON fixture:
//!
//! ```json
//! {
//!   "knowledge_bases": [{"user_id": "u1", "name": "papers", "description": "", "collection": "kb_papers"}],
//!   "files": [{"id": "f1", "user_id": "u1", "name": "notes.md", "title": "Notes", "file_type": "md", "content": "..."}],
//!   "chunks": [{"collection": "kb_papers", "user_id": "u1", "source_id": "f1", "text": "...", "topic_l1": "ml"}]
//! }
//! ```
//!
//! Chunks without a `vector` are embedded at load time.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::{FileRecord, FileStore, KnowledgeBase, SearchFilter, SearchHit, StoreError, VectorSearch};
use crate::llm::Embedder;

#[derive(Debug, Clone, Deserialize)]
struct FixtureKnowledgeBase {
    user_id: String,
    #[serde(flatten)]
    knowledge_base: KnowledgeBase,
}

/// One embedded text chunk
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Chunk {
    pub collection: String,
    pub user_id: String,
    pub source_id: String,
    pub text: String,
    #[serde(default)]
    pub topic_l1: Option<String>,
    #[serde(default)]
    pub topic_l2: Option<String>,
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
}

#[derive(Debug, Default, Deserialize)]
struct Fixture {
    #[serde(default)]
    knowledge_bases: Vec<FixtureKnowledgeBase>,
    #[serde(default)]
    files: Vec<FileRecord>,
    #[serde(default)]
    chunks: Vec<Chunk>,
}

/// Knowledge bases, files and chunk vectors held in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    knowledge_bases: Vec<(String, KnowledgeBase)>,
    files: Vec<FileRecord>,
    collections: HashMap<String, Vec<Chunk>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a fixture file, embedding any chunk that has no vector.
    pub async fn load(path: impl AsRef<Path>, embedder: &dyn Embedder) -> Result<Self, StoreError> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let fixture: Fixture = serde_json::from_str(&raw)?;

        let mut store = Self::new();
        for kb in fixture.knowledge_bases {
            store.add_knowledge_base(kb.user_id, kb.knowledge_base);
        }
        for file in fixture.files {
            store.add_file(file);
        }

        let mut embedded = 0usize;
        for mut chunk in fixture.chunks {
            if chunk.vector.is_none() {
                chunk.vector = Some(embedder.embed(&chunk.text).await?);
                embedded += 1;
            }
            store.add_chunk(chunk)?;
        }

        info!(
            path = %path.as_ref().display(),
            knowledge_bases = store.knowledge_bases.len(),
            files = store.files.len(),
            collections = store.collections.len(),
            embedded,
            "Loaded data fixture"
        );
        Ok(store)
    }

    /// Register a knowledge base; its collection exists from now on, even if empty.
    pub fn add_knowledge_base(&mut self, user_id: impl Into<String>, kb: KnowledgeBase) -> &mut Self {
        self.collections.entry(kb.collection.clone()).or_default();
        self.knowledge_bases.push((user_id.into(), kb));
        self
    }

    pub fn add_file(&mut self, file: FileRecord) -> &mut Self {
        self.files.push(file);
        self
    }

    /// Add an embedded chunk. All vectors in one collection share a dimension.
    pub fn add_chunk(&mut self, chunk: Chunk) -> Result<&mut Self, StoreError> {
        let dims = chunk.vector.as_ref().map(Vec::len).ok_or_else(|| {
            StoreError::Backend(format!("chunk from {} has no vector", chunk.source_id))
        })?;
        let collection = self.collections.entry(chunk.collection.clone()).or_default();
        if let Some(expected) = collection.first().and_then(|c| c.vector.as_ref()).map(Vec::len) {
            if expected != dims {
                return Err(StoreError::Dimension {
                    expected,
                    actual: dims,
                });
            }
        }
        collection.push(chunk);
        Ok(self)
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn knowledge_bases(&self, user_id: &str) -> Result<Vec<KnowledgeBase>, StoreError> {
        Ok(self
            .knowledge_bases
            .iter()
            .filter(|(owner, _)| owner == user_id)
            .map(|(_, kb)| kb.clone())
            .collect())
    }

    async fn find_files(
        &self,
        user_id: &str,
        query: &str,
        file_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<FileRecord>, StoreError> {
        let terms = tokens(query);
        let mut matches: Vec<(usize, &FileRecord)> = self
            .files
            .iter()
            .filter(|f| f.user_id == user_id)
            .filter(|f| file_type.map_or(true, |t| f.file_type.eq_ignore_ascii_case(t)))
            .filter_map(|f| {
                if terms.is_empty() {
                    return Some((0, f));
                }
                let haystack = tokens(&format!("{} {}", f.name, f.title));
                let overlap = terms.iter().filter(|t| haystack.contains(*t)).count();
                (overlap > 0).then_some((overlap, f))
            })
            .collect();

        matches.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));
        Ok(matches
            .into_iter()
            .take(limit)
            .map(|(_, f)| f.clone())
            .collect())
    }

    async fn get_file(&self, user_id: &str, id: &str) -> Result<Option<FileRecord>, StoreError> {
        Ok(self
            .files
            .iter()
            .find(|f| f.id == id && f.user_id == user_id)
            .cloned())
    }
}

#[async_trait]
impl VectorSearch for MemoryStore {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let chunks = self
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;

        let mut hits = Vec::new();
        for chunk in chunks {
            if !filter.matches(&chunk.user_id, chunk.topic_l1.as_deref(), chunk.topic_l2.as_deref()) {
                continue;
            }
            let Some(stored) = chunk.vector.as_deref() else {
                continue;
            };
            if stored.len() != vector.len() {
                return Err(StoreError::Dimension {
                    expected: stored.len(),
                    actual: vector.len(),
                });
            }
            hits.push(SearchHit {
                text: chunk.text.clone(),
                source_id: chunk.source_id.clone(),
                topic: chunk.topic_l1.clone(),
                score: cosine_similarity(stored, vector),
            });
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatError;
    use std::io::Write;

    fn file(id: &str, user: &str, name: &str, title: &str, file_type: &str) -> FileRecord {
        FileRecord {
            id: id.into(),
            user_id: user.into(),
            name: name.into(),
            title: title.into(),
            file_type: file_type.into(),
            content: format!("content of {}", name),
            metadata: serde_json::Value::Null,
        }
    }

    fn chunk(collection: &str, user: &str, text: &str, vector: Vec<f32>) -> Chunk {
        Chunk {
            collection: collection.into(),
            user_id: user.into(),
            source_id: format!("src-{}", text),
            text: text.into(),
            topic_l1: Some("t".into()),
            topic_l2: None,
            vector: Some(vector),
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_find_files_scoped_to_user() {
        let mut store = MemoryStore::new();
        store
            .add_file(file("f1", "u1", "budget-2024.xlsx", "Budget", "xlsx"))
            .add_file(file("f2", "u2", "budget-2023.xlsx", "Budget", "xlsx"))
            .add_file(file("f3", "u1", "notes.md", "Meeting notes", "md"));

        let found = store.find_files("u1", "budget", None, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "f1");

        let md = store.find_files("u1", "", Some("MD"), 10).await.unwrap();
        assert_eq!(md.len(), 1);
        assert_eq!(md[0].id, "f3");
    }

    #[tokio::test]
    async fn test_get_file_denies_other_users() {
        let mut store = MemoryStore::new();
        store.add_file(file("f1", "u1", "a.txt", "A", "txt"));
        assert!(store.get_file("u1", "f1").await.unwrap().is_some());
        assert!(store.get_file("u2", "f1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let mut store = MemoryStore::new();
        store.add_chunk(chunk("c", "u1", "far", vec![0.0, 1.0])).unwrap();
        store.add_chunk(chunk("c", "u1", "near", vec![1.0, 0.1])).unwrap();
        store.add_chunk(chunk("c", "u2", "other", vec![1.0, 0.0])).unwrap();

        let hits = store
            .search("c", &[1.0, 0.0], 5, &SearchFilter::for_user("u1"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "near");
    }

    #[tokio::test]
    async fn test_unknown_collection_is_error() {
        let store = MemoryStore::new();
        let err = store
            .search("missing", &[1.0], 5, &SearchFilter::for_user("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownCollection(_)));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut store = MemoryStore::new();
        store.add_chunk(chunk("c", "u1", "a", vec![1.0, 0.0])).unwrap();
        assert!(store.add_chunk(chunk("c", "u1", "b", vec![1.0])).is_err());
    }

    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ChatError> {
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    #[tokio::test]
    async fn test_load_fixture_embeds_missing_vectors() {
        let mut fixture = tempfile::NamedTempFile::new().unwrap();
        write!(
            fixture,
            r#"{{
                "knowledge_bases": [{{"user_id": "u1", "name": "papers", "collection": "kb_papers"}}],
                "files": [{{"id": "f1", "user_id": "u1", "name": "a.md"}}],
                "chunks": [{{"collection": "kb_papers", "user_id": "u1", "source_id": "f1", "text": "hello"}}]
            }}"#
        )
        .unwrap();

        let store = MemoryStore::load(fixture.path(), &LengthEmbedder).await.unwrap();
        let kbs = store.knowledge_bases("u1").await.unwrap();
        assert_eq!(kbs[0].name, "papers");
        assert!(kbs[0].description.is_empty());

        let hits = store
            .search("kb_papers", &[5.0, 1.0], 5, &SearchFilter::for_user("u1"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_id, "f1");
    }
}
