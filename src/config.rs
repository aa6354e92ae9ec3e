//! Settings loaded from the process environment
//!
//! Every value has a default matching the reference deployment; the
//! environment only overrides. Unparseable numbers are rejected rather than
//! silently ignored.
//!
//! | Variable | Default |
//! |---|---|
//! | `LLM_BACKEND` | `openai` (`ollama`, `openai`, `vllm`) |
//! | `LLM_MODEL` / `LLM_SUB_MODEL` | `gpt-4o-mini` |
//! | `EMBEDDING_MODEL` | `text-embedding-3-small` |
//! | `OPENAI_API_KEY`, `VLLM_URL` | empty |
//! | `OLLAMA_URL` | `http://localhost:11434` |
//! | `RLM_MAX_ITERATIONS` | 15 |
//! | `RLM_PYTHON` | `python3` |
//! | `RLM_EXEC_TIMEOUT_MS` | 120000 |
//! | `RLM_MODEL_TIMEOUT_MS` | unset (no deadline) |
//! | `RLM_MEMORY_LIMIT_MB` | 2048 (0 disables) |
//! | `RLM_CPU_LIMIT_SECS` | 600 (0 disables) |
//! | `RLM_SECCOMP` | `false` |
//! | `RLM_SUB_CALL_BURST` / `RLM_SUB_CALL_RATE` | unset (no rate limit); a non-zero rate must be at least 0.001 |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | unset (console logging only) |

use std::str::FromStr;
use std::time::Duration;

use crate::engine::EngineConfig;
use crate::llm::ollama::DEFAULT_OLLAMA_URL;
use crate::sandbox::SandboxConfig;

/// Slowest accepted sub-call refill rate, in calls per second
pub const MIN_SUB_CALL_RATE: f64 = 0.001;

/// Error raised for an environment value that cannot be parsed
#[derive(Debug, thiserror::Error)]
#[error("invalid value {value:?} for {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

/// Which model server family to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Ollama,
    OpenAi,
    Vllm,
}

impl FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(LlmBackend::Ollama),
            "openai" => Ok(LlmBackend::OpenAi),
            "vllm" => Ok(LlmBackend::Vllm),
            other => Err(format!("unknown backend `{other}` (expected ollama, openai, vllm)")),
        }
    }
}

/// Model server selection and credentials
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub backend: LlmBackend,
    pub model: String,
    pub sub_model: String,
    pub embedding_model: String,
    pub openai_api_key: String,
    pub vllm_url: String,
    pub ollama_url: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            backend: LlmBackend::OpenAi,
            model: "gpt-4o-mini".to_string(),
            sub_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            openai_api_key: String::new(),
            vllm_url: String::new(),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
        }
    }
}

/// Token-bucket parameters for `llm_query` calls issued from sandboxed code
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubCallLimit {
    pub burst: u64,
    pub per_second: f64,
}

/// Everything the `rlm` binary needs to wire an engine
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub engine: EngineConfig,
    pub sandbox: SandboxConfig,
    pub sub_call_limit: Option<SubCallLimit>,
    pub otlp_endpoint: Option<String>,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut settings = Settings::default();

        if let Some(raw) = get("LLM_BACKEND") {
            settings.llm.backend = raw.parse().map_err(|reason| ConfigError {
                key: "LLM_BACKEND",
                value: raw.clone(),
                reason,
            })?;
        }
        if let Some(v) = get("LLM_MODEL") {
            settings.llm.model = v;
        }
        if let Some(v) = get("LLM_SUB_MODEL") {
            settings.llm.sub_model = v;
        }
        if let Some(v) = get("EMBEDDING_MODEL") {
            settings.llm.embedding_model = v;
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            settings.llm.openai_api_key = v;
        }
        if let Some(v) = get("VLLM_URL") {
            settings.llm.vllm_url = v;
        }
        if let Some(v) = get("OLLAMA_URL") {
            settings.llm.ollama_url = v;
        }

        settings.engine.model = settings.llm.model.clone();
        settings.engine.sub_model = settings.llm.sub_model.clone();
        if let Some(n) = parse_number::<usize>("RLM_MAX_ITERATIONS", get("RLM_MAX_ITERATIONS"))? {
            if n == 0 {
                return Err(ConfigError {
                    key: "RLM_MAX_ITERATIONS",
                    value: n.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            settings.engine.max_iterations = n;
        }
        if let Some(ms) = parse_number::<u64>("RLM_MODEL_TIMEOUT_MS", get("RLM_MODEL_TIMEOUT_MS"))? {
            settings.engine.model_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        if let Some(v) = get("RLM_PYTHON") {
            settings.sandbox.python = v;
        }
        if let Some(ms) = parse_number::<u64>("RLM_EXEC_TIMEOUT_MS", get("RLM_EXEC_TIMEOUT_MS"))? {
            settings.sandbox.exec_timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(mb) = parse_number::<u64>("RLM_MEMORY_LIMIT_MB", get("RLM_MEMORY_LIMIT_MB"))? {
            settings.sandbox.limits.memory_bytes = (mb > 0).then(|| mb * 1024 * 1024);
        }
        if let Some(secs) = parse_number::<u64>("RLM_CPU_LIMIT_SECS", get("RLM_CPU_LIMIT_SECS"))? {
            settings.sandbox.limits.cpu_seconds = (secs > 0).then_some(secs);
        }
        if let Some(raw) = get("RLM_SECCOMP") {
            settings.sandbox.seccomp = parse_bool(&raw).ok_or_else(|| ConfigError {
                key: "RLM_SECCOMP",
                value: raw.clone(),
                reason: "expected true/false".to_string(),
            })?;
        }

        let burst = parse_number::<u64>("RLM_SUB_CALL_BURST", get("RLM_SUB_CALL_BURST"))?;
        let rate = parse_number::<f64>("RLM_SUB_CALL_RATE", get("RLM_SUB_CALL_RATE"))?;
        if let Some(r) = rate {
            if !r.is_finite() || (r > 0.0 && r < MIN_SUB_CALL_RATE) {
                return Err(ConfigError {
                    key: "RLM_SUB_CALL_RATE",
                    value: r.to_string(),
                    reason: format!("must be finite and either 0 or at least {}", MIN_SUB_CALL_RATE),
                });
            }
        }
        settings.sub_call_limit = match (burst, rate) {
            (None, None) => None,
            (burst, rate) => Some(SubCallLimit {
                burst: burst.unwrap_or(10).max(1),
                per_second: rate.unwrap_or(1.0).max(0.0),
            }),
        };

        settings.otlp_endpoint = get("OTEL_EXPORTER_OTLP_ENDPOINT");
        Ok(settings)
    }
}

fn parse_number<T>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|value| {
        value.trim().parse::<T>().map_err(|e| ConfigError {
            key,
            value: value.clone(),
            reason: e.to_string(),
        })
    })
    .transpose()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
