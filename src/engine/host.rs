//! Host side of the functions bound into a run's namespace
//!
//! Calls arrive from the sandbox while the worker is blocked. Each one is
//! awaited here on the engine's runtime, so `llm_query` inside agent code is
//! an ordinary await point of the run.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info_span, Instrument};

use super::EngineConfig;
use crate::llm::{complete_with_timeout, ChatMessage, ChatModel, CompletionRequest};
use crate::metrics::{HOST_CALLS, LLM_CALL_DURATION};
use crate::sandbox::{CallError, HostCalls};
use crate::security::RateLimiter;
use crate::tools::{CallArgs, ToolSet};

/// Name of the recursive model call.
pub const LLM_QUERY: &str = "llm_query";

/// Routes sandbox calls to the run's tools or to the sub-model.
pub struct HostDispatch<'a> {
    pub chat: &'a dyn ChatModel,
    pub config: &'a EngineConfig,
    pub tools: &'a ToolSet,
    pub limiter: Option<&'a RateLimiter>,
    pub trace_id: &'a str,
}

impl HostDispatch<'_> {
    /// Names seeded into the namespace, `llm_query` first; a tool with the same
    /// name replaces it.
    pub fn function_names(tools: &ToolSet) -> Vec<String> {
        let mut names = vec![LLM_QUERY.to_string()];
        for name in tools.names() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    async fn llm_query(&self, args: CallArgs) -> Result<Value, CallError> {
        let prompt = args
            .string(0, &["prompt"])
            .map_err(|e| CallError::Failed(e.to_string()))?
            .unwrap_or_default();
        if prompt.trim().is_empty() {
            return Err(CallError::Failed("llm_query requires a non-empty prompt".into()));
        }
        let ctx = args
            .string(1, &["ctx", "context"])
            .map_err(|e| CallError::Failed(e.to_string()))?
            .unwrap_or_default();

        if let Some(limiter) = self.limiter {
            limiter
                .try_acquire()
                .map_err(|e| CallError::Failed(format!("RateLimitError: {}", e)))?;
        }

        let content = if ctx.is_empty() {
            prompt
        } else {
            format!("{}\n\nContext:\n{}", prompt, ctx)
        };
        let messages = [ChatMessage::user(content)];
        let request = CompletionRequest {
            model: &self.config.sub_model,
            messages: &messages,
            max_tokens: self.config.sub_max_tokens,
        };

        let span = info_span!(
            "sub_llm_call",
            trace_id = %self.trace_id,
            model = %self.config.sub_model,
            otel.name = "sub_llm_call"
        );
        let started = Instant::now();
        let result = complete_with_timeout(self.chat, request, self.config.model_timeout)
            .instrument(span)
            .await;
        let elapsed = started.elapsed();
        LLM_CALL_DURATION
            .with_label_values(&[&self.config.sub_model, "sub"])
            .observe(elapsed.as_secs_f64());

        let answer = result?;
        debug!(
            trace_id = %self.trace_id,
            duration_ms = elapsed.as_millis() as u64,
            answer_len = answer.len(),
            "Sub-model call completed"
        );
        Ok(Value::String(answer))
    }
}

#[async_trait]
impl HostCalls for HostDispatch<'_> {
    async fn call(&self, name: &str, args: CallArgs) -> Result<Value, CallError> {
        let known = self.tools.get(name).is_some();
        let result = if known {
            self.tools
                .call(name, args)
                .await
                .map_err(|e| CallError::Failed(e.to_string()))
        } else if name == LLM_QUERY {
            self.llm_query(args).await
        } else {
            Err(CallError::Failed(format!("unknown function `{}`", name)))
        };

        let label = match &result {
            Ok(_) => "ok",
            Err(CallError::Failed(_)) => "failed",
            Err(CallError::Upstream(_)) => "upstream",
        };
        let function = if known || name == LLM_QUERY { name } else { "unknown" };
        HOST_CALLS.with_label_values(&[function, label]).inc();
        debug!(trace_id = %self.trace_id, function = name, result = label, "Host call");
        result
    }
}
