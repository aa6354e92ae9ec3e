//! Persistent execution environment for agent-authored code
//!
//! A [`Sandbox`] runs one fragment per call and keeps every variable the
//! fragment defines for the next call. Errors raised by the code are data:
//! they come back rendered in [`Execution::stderr`], never as a Rust error.
//!
//! ```text
//!  Engine                         PythonSandbox                 worker (python3 -u)
//!    │ execute(code, host) ─────────► {"type":"exec"} ─────────────► exec(code, globals)
//!    │                                    │                            │ llm_query("..")
//!    │ ◄── host.call("llm_query") ◄───────┤ ◄──── {"type":"call"} ◄────┤ (blocks on stdin)
//!    │ ──── Ok(value) ───────────────────►│ ─── {"type":"result"} ────►│ returns value
//!    │                                    │ ◄──── {"type":"done"} ◄────┘
//!    │ ◄── Execution{stdout,stderr,..} ◄──┘
//! ```
//!
//! Host functions are awaited on the host's own runtime while the worker
//! blocks, so the synchronous call inside agent code never needs a nested
//! event loop.

pub mod protocol;
pub mod worker;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::ChatError;
use crate::security::ResourceLimits;
use crate::tools::CallArgs;

pub use worker::{PythonSandbox, PythonSandboxFactory};

/// What the namespace is seeded with when a sandbox is created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Seed {
    /// Bound as the global `context`.
    pub context: String,
    /// Host functions to expose as callables, in binding order.
    pub functions: Vec<String>,
}

/// Outcome of one fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Execution {
    pub stdout: String,
    pub stderr: String,
    /// `"<Kind>: <message>"` of the error the fragment raised, if any.
    pub raised: Option<String>,
    /// Value passed to `SUBMIT` during this fragment, if it was called.
    pub submitted: Option<String>,
}

impl Execution {
    /// An execution that failed before producing output, e.g. a timeout.
    pub fn failed(raised: impl Into<String>, note: &str) -> Self {
        let raised = raised.into();
        let mut stderr = format!("Error: {}", raised);
        if !note.is_empty() {
            stderr.push('\n');
            stderr.push_str(note);
        }
        Self {
            stdout: String::new(),
            stderr,
            raised: Some(raised),
            submitted: None,
        }
    }
}

/// Failure of a host function called from sandboxed code.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Raised in the agent's code as `RuntimeError(msg)`; the run goes on.
    #[error("{0}")]
    Failed(String),

    /// A model call failed; the execution is abandoned and the run ends.
    #[error(transparent)]
    Upstream(#[from] ChatError),
}

/// Errors that end a run rather than being reported to the model.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to start sandbox worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("sandbox worker broke protocol: {0}")]
    Protocol(String),

    #[error("host function failed: {0}")]
    Upstream(#[from] ChatError),
}

/// The host side of every function bound into a sandbox namespace.
#[async_trait]
pub trait HostCalls: Send + Sync {
    async fn call(&self, name: &str, args: CallArgs) -> Result<Value, CallError>;
}

/// One namespace, owned by one engine run.
#[async_trait]
pub trait Sandbox: Send {
    /// Run `code` against the persistent namespace.
    async fn execute(&mut self, code: &str, host: &dyn HostCalls)
        -> Result<Execution, SandboxError>;
}

/// Creates a fresh, seeded sandbox per run.
#[async_trait]
pub trait SandboxFactory: Send + Sync {
    async fn create(&self, seed: &Seed) -> Result<Box<dyn Sandbox>, SandboxError>;
}

/// Worker process settings
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Interpreter to launch
    pub python: String,
    /// Deadline for each wait on the worker; time spent in host calls is excluded
    pub exec_timeout: Duration,
    pub limits: ResourceLimits,
    /// Clear every capability in the worker
    pub drop_capabilities: bool,
    /// Install the seccomp deny-list in the worker
    pub seccomp: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            exec_timeout: Duration::from_secs(120),
            limits: ResourceLimits::default(),
            drop_capabilities: true,
            seccomp: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_execution_renders_error_line() {
        let exec = Execution::failed("TimeoutError: execution exceeded 5 ms", "");
        assert_eq!(exec.stderr, "Error: TimeoutError: execution exceeded 5 ms");
        assert_eq!(
            exec.raised.as_deref(),
            Some("TimeoutError: execution exceeded 5 ms")
        );
        assert!(exec.stdout.is_empty());
    }

    #[test]
    fn test_failed_execution_appends_note() {
        let exec = Execution::failed("WorkerExited: signal 9", "Sandbox restarted.");
        assert_eq!(exec.stderr, "Error: WorkerExited: signal 9\nSandbox restarted.");
    }

    #[test]
    fn test_call_error_display() {
        assert_eq!(CallError::Failed("boom".into()).to_string(), "boom");
    }
}
