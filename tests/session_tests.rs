//! Integration tests for per-user sessions

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FlatEmbedder;
use rlm_engine::store::{KnowledgeBase, MemoryStore};
use rlm_engine::{DataScope, SessionManager};

fn scope(store: MemoryStore) -> DataScope {
    let store = Arc::new(store);
    DataScope {
        files: store.clone(),
        search: store,
    }
}

fn store_with(kbs: &[(&str, &str)]) -> MemoryStore {
    let mut store = MemoryStore::new();
    for (user, name) in kbs {
        store.add_knowledge_base(
            *user,
            KnowledgeBase {
                name: name.to_string(),
                description: String::new(),
                collection: format!("kb_{}", name),
            },
        );
    }
    store
}

#[tokio::test]
async fn test_every_call_builds_a_new_session() {
    let manager = SessionManager::new(Arc::new(FlatEmbedder));

    let first = manager.get_or_create("u1", scope(store_with(&[]))).await.unwrap();
    let second = manager.get_or_create("u1", scope(store_with(&[]))).await.unwrap();

    assert_ne!(first.id, second.id);
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(!Arc::ptr_eq(&first.context, &second.context));
    assert_eq!(manager.len().await, 1);
    assert_eq!(manager.get("u1").await.unwrap().id, second.id);
}

#[tokio::test]
async fn test_session_reflects_current_scope() {
    let manager = SessionManager::new(Arc::new(FlatEmbedder));

    let before = manager
        .get_or_create("u1", scope(store_with(&[("u1", "papers")])))
        .await
        .unwrap();
    let after = manager
        .get_or_create("u1", scope(store_with(&[("u1", "papers"), ("u1", "notes"), ("u2", "x")])))
        .await
        .unwrap();

    assert_eq!(before.context.knowledge_bases.len(), 1);
    assert_eq!(after.context.knowledge_bases.len(), 2);
    assert_eq!(after.tools.len(), 4);
    assert!(after.tool_descriptions.contains("search_docs("));
}

#[tokio::test]
async fn test_invalidate() {
    let manager = SessionManager::new(Arc::new(FlatEmbedder));
    manager.get_or_create("u1", scope(store_with(&[]))).await.unwrap();
    manager.get_or_create("u2", scope(store_with(&[]))).await.unwrap();

    assert!(manager.invalidate("u1").await);
    assert!(!manager.invalidate("u1").await);
    assert!(manager.get("u1").await.is_none());
    assert!(manager.get("u2").await.is_some());
}

#[tokio::test]
async fn test_idle_sessions_expire() {
    let manager =
        SessionManager::new(Arc::new(FlatEmbedder)).with_idle_ttl(Duration::from_millis(20));
    manager.get_or_create("u1", scope(store_with(&[]))).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    manager.get_or_create("u2", scope(store_with(&[]))).await.unwrap();

    assert!(manager.get("u1").await.is_none());
    assert!(manager.get("u2").await.is_some());
}
