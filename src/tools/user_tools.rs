//! The four per-user retrieval tools
//!
//! | Tool | Backed by |
//! |---|---|
//! | `list_knowledge_bases()` | [`ToolContext::knowledge_bases`] snapshot |
//! | `search_docs(query, scope, topic_filter, top_k)` | embedder + vector search |
//! | `find_file(query, file_type, top_k)` | file store |
//! | `get_file(id)` | file store |

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{json, Value};
use tracing::warn;

use super::{CallArgs, Tool, ToolContext, ToolError, ToolSet};
use crate::metrics::TOOL_SCOPE_ERRORS;
use crate::prompts::truncate_chars;
use crate::store::SearchFilter;

const SEARCH_DEFAULT_TOP_K: i64 = 5;
const SEARCH_MAX_TOP_K: i64 = 20;
const SEARCH_SNIPPET_CHARS: usize = 500;

const FIND_DEFAULT_TOP_K: i64 = 5;
const FIND_MAX_TOP_K: i64 = 50;
const FIND_PREVIEW_CHARS: usize = 200;

const LIST_KNOWLEDGE_BASES_DOC: &str = "- list_knowledge_bases() -> list[dict]
  List all available knowledge bases with their descriptions.
  Returns: name, description, collection.";

const SEARCH_DOCS_DOC: &str = "- search_docs(query: str, scope: str = \"all\", topic_filter: str = None, top_k: int = 5) -> list[dict]
  Semantic search across document chunks. Use for conceptual queries.
  scope is \"all\", a knowledge base name, or a collection name (alias: knowledge_base). top_k is at most 20.
  Returns: text snippet, source_id, topic, relevance score, scope.";

const FIND_FILE_DOC: &str = "- find_file(query: str, file_type: str = None, top_k: int = 5) -> list[dict]
  Fuzzy filename/title matching. Use when looking for a SPECIFIC document by name.
  Returns: id, name, title, type, preview.";

const GET_FILE_DOC: &str = "- get_file(id: str) -> dict
  Retrieve the full text of a file by its ID.
  Returns: id, name, title, content, metadata.";

/// The description block inserted into the system prompt.
pub fn tool_descriptions() -> String {
    format!(
        "\n{}\n\n{}\n\n{}\n\n{}\n",
        LIST_KNOWLEDGE_BASES_DOC, SEARCH_DOCS_DOC, FIND_FILE_DOC, GET_FILE_DOC
    )
}

/// Bind the four tools to one user's context.
pub fn build_user_tools(ctx: Arc<ToolContext>) -> ToolSet {
    let mut tools = ToolSet::new();
    tools.insert(Arc::new(ListKnowledgeBases { ctx: ctx.clone() }));
    tools.insert(Arc::new(SearchDocs { ctx: ctx.clone() }));
    tools.insert(Arc::new(FindFile { ctx: ctx.clone() }));
    tools.insert(Arc::new(GetFile { ctx }));
    tools
}

pub struct ListKnowledgeBases {
    ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for ListKnowledgeBases {
    fn name(&self) -> &str {
        "list_knowledge_bases"
    }

    async fn call(&self, _args: CallArgs) -> Result<Value, ToolError> {
        Ok(Value::Array(
            self.ctx
                .knowledge_bases
                .iter()
                .map(|kb| {
                    json!({
                        "name": kb.name,
                        "description": kb.description,
                        "collection": kb.collection,
                    })
                })
                .collect(),
        ))
    }
}

/// Vector search over one, several, or all of the user's collections.
///
/// A scope that fails contributes an `{error}` entry instead of failing
/// the call; only an embedding failure is an error.
pub struct SearchDocs {
    ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for SearchDocs {
    fn name(&self) -> &str {
        "search_docs"
    }

    async fn call(&self, args: CallArgs) -> Result<Value, ToolError> {
        let query = args.required_string(0, &["query"])?;
        let scope = args
            .string(1, &["scope", "knowledge_base"])?
            .unwrap_or_else(|| "all".to_string());
        let topic = args
            .string(2, &["topic_filter"])?
            .filter(|t| !t.is_empty());
        let top_k = args
            .integer(3, &["top_k"])?
            .unwrap_or(SEARCH_DEFAULT_TOP_K)
            .clamp(1, SEARCH_MAX_TOP_K) as usize;

        let vector = self
            .ctx
            .embedder
            .embed(&query)
            .await
            .map_err(ToolError::Embedding)?;

        let mut filter = SearchFilter::for_user(&self.ctx.user_id);
        if let Some(topic) = topic {
            filter = filter.with_topic(topic);
        }

        let collections = if scope == "all" {
            self.ctx.all_collections()
        } else {
            vec![self.ctx.collection_for(&scope)]
        };

        let searches = collections.iter().map(|collection| {
            self.ctx.search.search(collection, &vector, top_k, &filter)
        });
        let outcomes = join_all(searches).await;

        let mut results: Vec<(f32, Value)> = Vec::new();
        for (collection, outcome) in collections.iter().zip(outcomes) {
            match outcome {
                Ok(hits) => results.extend(hits.into_iter().map(|hit| {
                    let entry = json!({
                        "text": truncate_chars(&hit.text, SEARCH_SNIPPET_CHARS),
                        "source_id": hit.source_id,
                        "topic": hit.topic.unwrap_or_default(),
                        "score": hit.score,
                        "scope": collection,
                    });
                    (hit.score, entry)
                })),
                Err(e) => {
                    TOOL_SCOPE_ERRORS.with_label_values(&["search_docs"]).inc();
                    warn!(collection = %collection, error = %e, "search_docs scope failed");
                    results.push((
                        0.0,
                        json!({ "error": format!("Search failed on {}: {}", collection, e) }),
                    ));
                }
            }
        }

        results.sort_by(|a, b| b.0.total_cmp(&a.0));
        results.truncate(top_k);
        Ok(Value::Array(results.into_iter().map(|(_, v)| v).collect()))
    }
}

pub struct FindFile {
    ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for FindFile {
    fn name(&self) -> &str {
        "find_file"
    }

    async fn call(&self, args: CallArgs) -> Result<Value, ToolError> {
        let query = args.required_string(0, &["query"])?;
        let file_type = args.string(1, &["file_type"])?.filter(|t| !t.is_empty());
        let top_k = args
            .integer(2, &["top_k"])?
            .unwrap_or(FIND_DEFAULT_TOP_K)
            .clamp(1, FIND_MAX_TOP_K) as usize;

        let files = self
            .ctx
            .files
            .find_files(&self.ctx.user_id, &query, file_type.as_deref(), top_k)
            .await?;

        Ok(Value::Array(
            files
                .iter()
                .map(|f| {
                    json!({
                        "id": f.id,
                        "name": f.name,
                        "title": f.title,
                        "type": f.file_type,
                        "preview": truncate_chars(&f.content, FIND_PREVIEW_CHARS),
                    })
                })
                .collect(),
        ))
    }
}

pub struct GetFile {
    ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for GetFile {
    fn name(&self) -> &str {
        "get_file"
    }

    async fn call(&self, args: CallArgs) -> Result<Value, ToolError> {
        let id = args.required_string(0, &["id", "file_id"])?;
        match self.ctx.files.get_file(&self.ctx.user_id, &id).await? {
            Some(file) => Ok(json!({
                "id": file.id,
                "name": file.name,
                "title": file.title,
                "content": file.content,
                "metadata": file.metadata,
            })),
            None => Ok(json!({ "error": "File not found or access denied" })),
        }
    }
}
