//! Integration tests for the user tools

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use common::FlatEmbedder;
use rlm_engine::store::{
    FileRecord, FileStore, KnowledgeBase, MemoryStore, SearchFilter, SearchHit, StoreError,
    VectorSearch,
};
use rlm_engine::tools::{build_user_tools, CallArgs, ToolContext};

/// Returns `per_collection` hits everywhere except collections listed as broken
struct CountingSearch {
    per_collection: usize,
    broken: Vec<String>,
    calls: AtomicUsize,
    seen: Mutex<Vec<(String, usize)>>,
}

impl CountingSearch {
    fn new(per_collection: usize, broken: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            per_collection,
            broken: broken.iter().map(|s| s.to_string()).collect(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl VectorSearch for CountingSearch {
    async fn search(
        &self,
        collection: &str,
        _vector: &[f32],
        top_k: usize,
        _filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push((collection.to_string(), top_k));
        if self.broken.iter().any(|b| b == collection) {
            return Err(StoreError::Backend("connection refused".into()));
        }
        Ok((0..self.per_collection)
            .map(|i| SearchHit {
                text: format!("{} chunk {}", collection, i),
                source_id: format!("{}-{}", collection, i),
                topic: None,
                score: 1.0 - i as f32 / 100.0,
            })
            .collect())
    }
}

fn knowledge_base(name: &str) -> KnowledgeBase {
    KnowledgeBase {
        name: name.to_string(),
        description: format!("{} docs", name),
        collection: format!("kb_{}", name),
    }
}

fn context(files: Arc<dyn FileStore>, search: Arc<dyn VectorSearch>, kbs: &[&str]) -> Arc<ToolContext> {
    Arc::new(ToolContext {
        user_id: "u1".into(),
        knowledge_bases: kbs.iter().map(|n| knowledge_base(n)).collect(),
        files,
        search,
        embedder: Arc::new(FlatEmbedder),
    })
}

fn file(id: &str, user_id: &str, name: &str) -> FileRecord {
    FileRecord {
        id: id.into(),
        user_id: user_id.into(),
        name: name.into(),
        title: name.trim_end_matches(".md").replace('_', " "),
        file_type: "md".into(),
        content: "z".repeat(300),
        metadata: json!({"pages": 1}),
    }
}

async fn call(ctx: Arc<ToolContext>, name: &str, args: CallArgs) -> Value {
    build_user_tools(ctx).call(name, args).await.unwrap()
}

#[tokio::test]
async fn test_search_docs_caps_top_k() {
    let search = CountingSearch::new(30, &[]);
    let ctx = context(Arc::new(MemoryStore::new()), search.clone(), &["a", "b"]);

    let args = CallArgs::positional([json!("query")]).with_keyword("top_k", json!(100));
    let results = call(ctx, "search_docs", args).await;

    assert_eq!(results.as_array().unwrap().len(), 20);
    assert!(search.seen.lock().unwrap().iter().all(|(_, k)| *k == 20));
}

#[tokio::test]
async fn test_search_docs_all_scopes_one_call_each() {
    let search = CountingSearch::new(2, &[]);
    let ctx = context(Arc::new(MemoryStore::new()), search.clone(), &["a", "b", "c"]);

    let results = call(ctx, "search_docs", CallArgs::positional([json!("query")])).await;

    assert_eq!(search.calls.load(Ordering::SeqCst), 3);
    assert_eq!(results.as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_search_docs_sorted_by_score() {
    let search = CountingSearch::new(3, &[]);
    let ctx = context(Arc::new(MemoryStore::new()), search, &["a", "b"]);

    let args = CallArgs::positional([json!("q"), json!("all"), Value::Null, json!(6)]);
    let results = call(ctx, "search_docs", args).await;

    let scores: Vec<f64> = results
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["score"].as_f64().unwrap())
        .collect();
    assert_eq!(scores.len(), 6);
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_search_docs_failing_scope_contained() {
    let search = CountingSearch::new(2, &["kb_b"]);
    let ctx = context(Arc::new(MemoryStore::new()), search.clone(), &["a", "b", "c"]);

    let args = CallArgs::positional([json!("q")]).with_keyword("top_k", json!(10));
    let results = call(ctx, "search_docs", args).await;
    let results = results.as_array().unwrap();

    let errors: Vec<&Value> = results.iter().filter(|r| r.get("error").is_some()).collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0]["error"].as_str().unwrap().contains("kb_b"));
    assert_eq!(results.len() - errors.len(), 4);
    assert_eq!(search.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_search_docs_single_scope_by_name() {
    let search = CountingSearch::new(1, &[]);
    let ctx = context(Arc::new(MemoryStore::new()), search.clone(), &["a", "b"]);

    let args = CallArgs::positional([json!("q")]).with_keyword("scope", json!("b"));
    let results = call(ctx, "search_docs", args).await;

    assert_eq!(results[0]["scope"], "kb_b");
    assert_eq!(search.seen.lock().unwrap()[0].0, "kb_b");
}

#[tokio::test]
async fn test_list_knowledge_bases_echoes_scope() {
    let ctx = context(Arc::new(MemoryStore::new()), CountingSearch::new(0, &[]), &["papers"]);
    let kbs = call(ctx, "list_knowledge_bases", CallArgs::default()).await;
    assert_eq!(
        kbs,
        json!([{"name": "papers", "description": "papers docs", "collection": "kb_papers"}])
    );
}

#[tokio::test]
async fn test_find_file_scoped_to_owner() {
    let mut store = MemoryStore::new();
    store
        .add_file(file("f1", "u1", "budget_report.md"))
        .add_file(file("f2", "u2", "budget_plan.md"))
        .add_file(file("f3", "u1", "holiday.md"));
    let ctx = context(Arc::new(store), CountingSearch::new(0, &[]), &[]);

    let found = call(ctx, "find_file", CallArgs::positional([json!("budget")])).await;
    let found = found.as_array().unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["id"], "f1");
    assert_eq!(found[0]["type"], "md");
    assert_eq!(found[0]["preview"].as_str().unwrap().chars().count(), 200);
}

#[tokio::test]
async fn test_get_file_owner_only() {
    let mut store = MemoryStore::new();
    store.add_file(file("f1", "u1", "mine.md")).add_file(file("f2", "u2", "theirs.md"));
    let ctx = context(Arc::new(store), CountingSearch::new(0, &[]), &[]);

    let mine = call(ctx.clone(), "get_file", CallArgs::positional([json!("f1")])).await;
    assert_eq!(mine["name"], "mine.md");
    assert_eq!(mine["metadata"], json!({"pages": 1}));

    let theirs = call(ctx, "get_file", CallArgs::positional([json!("f2")])).await;
    assert!(theirs.get("error").is_some());
}

#[tokio::test]
async fn test_missing_argument_is_error() {
    let ctx = context(Arc::new(MemoryStore::new()), CountingSearch::new(0, &[]), &[]);
    let result = build_user_tools(ctx).call("get_file", CallArgs::default()).await;
    assert!(result.is_err());
}
