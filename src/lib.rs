//! rlm-engine - recursive language-model agent loop with a hardened Python sandbox
//!
//! A model answers a query by writing Python fragments that run in a
//! persistent, out-of-process worker. Fragments can call bound tools and a
//! smaller sub-model through `llm_query`, and finish by calling `SUBMIT`.
//!
//! # Modules
//!
//! - `engine` - the iteration state machine, fragment extraction, step observers
//! - `sandbox` - the Python worker, its wire protocol and host-call bridge
//! - `security` - rlimits, capabilities and seccomp for the worker; sub-call rate limiting
//! - `tools` - per-user tools and their argument binding
//! - `session` - per-user tool sessions
//! - `llm` - Ollama and OpenAI-compatible chat and embedding clients
//! - `store` - data-access interfaces and an in-memory store
//! - `transport` - streaming frames and the persisting observer
//! - `config`, `metrics`, `tracing` - settings and observability
//!
//! # Quick Start
//!
//! ```ignore
//! use rlm_engine::{Engine, EngineConfig, PythonSandboxFactory, SandboxConfig};
//!
//! let sandboxes = Arc::new(PythonSandboxFactory::new(SandboxConfig::default())?);
//! let engine = Engine::new(chat, sandboxes, EngineConfig::default());
//! let answer = engine.run("How many lines?", &text, &ToolSet::new(), "", None).await?;
//! ```

pub mod config;
pub mod engine;
pub mod llm;
pub mod metrics;
pub mod prompts;
pub mod sandbox;
pub mod security;
pub mod session;
pub mod store;
pub mod tools;
pub mod tracing;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use config::Settings;
pub use engine::{Engine, EngineConfig, EngineError, Step, StepObserver};
pub use sandbox::{PythonSandboxFactory, SandboxConfig};
pub use session::{DataScope, Session, SessionManager};
pub use tools::ToolSet;
