//! Host functions exposed to sandboxed code
//!
//! Every tool is a pure function of a [`ToolContext`] and its call
//! arguments. The context carries the user's identity and data handles
//! explicitly; nothing is captured implicitly.
//!
//! ```text
//!  search_docs(...) in sandbox ──► HostCalls ──► ToolSet::get("search_docs")
//!                                                   └─► SearchDocs::call(args)
//!                                                          └─► ctx.embedder / ctx.search
//! ```

pub mod args;
pub mod context;
pub mod user_tools;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::ChatError;
use crate::store::StoreError;

pub use args::CallArgs;
pub use context::ToolContext;
pub use user_tools::{build_user_tools, tool_descriptions};

/// Error type for tool calls; surfaces in sandboxed code as `RuntimeError`.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("missing required argument `{0}`")]
    MissingArgument(&'static str),

    #[error("argument `{name}` {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error("unknown function `{0}`")]
    UnknownTool(String),

    #[error("embedding failed: {0}")]
    Embedding(#[source] ChatError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A named host function callable from sandboxed code.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, args: CallArgs) -> Result<Value, ToolError>;
}

/// Tools in binding order, unique by name.
///
/// Immutable once handed to a run; shared between concurrent calls by `Arc`.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `tool`, replacing and returning any tool with the same name.
    pub fn insert(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(index) => Some(std::mem::replace(&mut self.tools[index], tool)),
            None => {
                self.tools.push(tool);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Dispatch a call by name.
    pub async fn call(&self, name: &str, args: CallArgs) -> Result<Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tool.call(args).await
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tools.iter().map(|t| t.name())).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo(&'static str, Value);

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            self.0
        }

        async fn call(&self, _args: CallArgs) -> Result<Value, ToolError> {
            Ok(self.1.clone())
        }
    }

    #[test]
    fn test_insert_keeps_order_and_replaces() {
        let mut set = ToolSet::new();
        assert!(set.insert(Arc::new(Echo("a", json!(1)))).is_none());
        assert!(set.insert(Arc::new(Echo("b", json!(2)))).is_none());
        assert!(set.insert(Arc::new(Echo("a", json!(3)))).is_some());
        assert_eq!(set.names(), vec!["a", "b"]);
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn test_call_dispatches_by_name() {
        let mut set = ToolSet::new();
        set.insert(Arc::new(Echo("a", json!("hit"))));
        assert_eq!(set.call("a", CallArgs::default()).await.unwrap(), json!("hit"));
        assert!(matches!(
            set.call("zzz", CallArgs::default()).await,
            Err(ToolError::UnknownTool(_))
        ));
    }
}
