//! The iteration state machine
//!
//! ```text
//!             ┌────────────┐  response has a fragment  ┌────────────┐
//!   start ──► │ Requesting │ ────────────────────────► │ Executing  │
//!             └────────────┘                           └────────────┘
//!                │   ▲                                     │
//!   no fragment  │   └──── report appended, no SUBMIT ─────┤
//!                ▼                                         │ SUBMIT called
//!             ┌────────────┐ ◄─────────────────────────────┘
//!             │  Terminal  │ ◄── iteration bound reached
//!             └────────────┘
//! ```

pub mod controller;
pub mod extract;
pub mod host;
pub mod step;

use std::time::Duration;

use crate::llm::ChatError;
use crate::sandbox::SandboxError;

pub use controller::{format_report, Engine};
pub use extract::{extract_fragment, extract_inline_submission};
pub use host::HostDispatch;
pub use step::{observe_with, ChannelObserver, FnObserver, Step, StepObserver};

/// Answer returned when the bound is reached without a submission.
pub const MAX_ITERATIONS_MESSAGE: &str = "Max iterations reached without a final answer.";

/// Configuration for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Primary model
    pub model: String,
    /// Model behind `llm_query`
    pub sub_model: String,
    /// Model calls per run before giving up
    pub max_iterations: usize,
    pub max_tokens: u32,
    pub sub_max_tokens: u32,
    /// Deadline for each model call; `None` waits indefinitely
    pub model_timeout: Option<Duration>,
    /// Characters of stdout kept per report
    pub stdout_limit: usize,
    /// Characters of stderr kept per report
    pub stderr_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            sub_model: "gpt-4o-mini".to_string(),
            max_iterations: 15,
            max_tokens: 4000,
            sub_max_tokens: 2000,
            model_timeout: None,
            stdout_limit: 8192,
            stderr_limit: 2000,
        }
    }
}

/// Failures that end a run. Everything else becomes the returned answer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("query is empty")]
    EmptyQuery,

    #[error("model call failed: {0}")]
    Upstream(#[from] ChatError),

    #[error(transparent)]
    Sandbox(SandboxError),
}

impl From<SandboxError> for EngineError {
    fn from(e: SandboxError) -> Self {
        match e {
            SandboxError::Upstream(chat) => EngineError::Upstream(chat),
            other => EngineError::Sandbox(other),
        }
    }
}
