//! Per-user tool sessions
//!
//! A [`Session`] is the set of tools bound to one user's data plus the
//! description block for the prompt. Data handles are scoped to the request
//! that supplied them, so [`SessionManager::get_or_create`] rebuilds the tools
//! on every call and replaces whatever was cached for that user. The cache
//! holds at most one session per user and exists so sessions can be looked up,
//! invalidated and expired.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::llm::Embedder;
use crate::metrics::SESSIONS_ACTIVE;
use crate::store::{FileStore, StoreError, VectorSearch};
use crate::tools::{build_user_tools, tool_descriptions, ToolContext, ToolSet};

/// Request-scoped data handles for one user
#[derive(Clone)]
pub struct DataScope {
    pub files: Arc<dyn FileStore>,
    pub search: Arc<dyn VectorSearch>,
}

/// Tools bound to one user. Immutable apart from the last-used timestamp.
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub tools: ToolSet,
    pub tool_descriptions: String,
    pub context: Arc<ToolContext>,
    pub created_at: DateTime<Utc>,
    last_used: StdMutex<DateTime<Utc>>,
}

impl Session {
    fn new(context: Arc<ToolContext>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id: context.user_id.clone(),
            tools: build_user_tools(context.clone()),
            tool_descriptions: tool_descriptions(),
            context,
            created_at: now,
            last_used: StdMutex::new(now),
        }
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        *self.last_used.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(|p| p.into_inner()) = Utc::now();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("tools", &self.tools)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Process-wide cache of the latest session per user.
pub struct SessionManager {
    embedder: Arc<dyn Embedder>,
    idle_ttl: Option<Duration>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            idle_ttl: None,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Drop cached sessions not used for `ttl`, checked on every `get_or_create`.
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = Some(ttl);
        self
    }

    /// Build a fresh session from `scope` and cache it, replacing any previous one.
    pub async fn get_or_create(
        &self,
        user_id: &str,
        scope: DataScope,
    ) -> Result<Arc<Session>, StoreError> {
        let knowledge_bases = scope.files.knowledge_bases(user_id).await?;
        let context = Arc::new(ToolContext {
            user_id: user_id.to_string(),
            knowledge_bases,
            files: scope.files,
            search: scope.search,
            embedder: self.embedder.clone(),
        });
        let session = Arc::new(Session::new(context));

        let mut sessions = self.sessions.lock().await;
        if let Some(previous) = sessions.insert(user_id.to_string(), session.clone()) {
            debug!(user_id, replaced = %previous.id, "Replaced cached session");
        }
        self.sweep(&mut sessions, user_id);
        SESSIONS_ACTIVE.set(sessions.len() as i64);

        debug!(
            user_id,
            session_id = %session.id,
            knowledge_bases = session.context.knowledge_bases.len(),
            "Session created"
        );
        Ok(session)
    }

    /// Cached session for `user_id`, marking it used.
    pub async fn get(&self, user_id: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.lock().await;
        let session = sessions.get(user_id)?.clone();
        session.touch();
        Some(session)
    }

    /// Forget the cached session; returns whether one existed.
    pub async fn invalidate(&self, user_id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        let removed = sessions.remove(user_id).is_some();
        SESSIONS_ACTIVE.set(sessions.len() as i64);
        if removed {
            debug!(user_id, "Session invalidated");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    fn sweep(&self, sessions: &mut HashMap<String, Arc<Session>>, current: &str) {
        let Some(ttl) = self.idle_ttl.and_then(|t| chrono::Duration::from_std(t).ok()) else {
            return;
        };
        let cutoff = Utc::now() - ttl;
        sessions.retain(|user_id, session| {
            let keep = user_id == current || session.last_used() >= cutoff;
            if !keep {
                debug!(user_id = %user_id, "Expired idle session");
            }
            keep
        });
    }
}
