//! Engine - drives one query from first model call to final answer
//!
//! Each run owns its history and its sandbox; nothing is shared between
//! concurrent runs except the model client and the sandbox factory.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::extract::{extract_fragment, extract_inline_submission, SUBMIT_MARKER};
use super::host::HostDispatch;
use super::step::{Step, StepObserver};
use super::{EngineConfig, EngineError, MAX_ITERATIONS_MESSAGE};
use crate::llm::{complete_with_timeout, ChatMessage, ChatModel, CompletionRequest};
use crate::metrics::{ENGINE_ITERATIONS, ENGINE_RUNS, LLM_CALL_DURATION};
use crate::prompts::{build_system_prompt, truncate_chars};
use crate::sandbox::{Execution, Sandbox, SandboxFactory, Seed};
use crate::security::RateLimiter;
use crate::tools::ToolSet;

/// How a run ended
enum Outcome {
    Submitted(String),
    InlineSubmit(String),
    PlainText(String),
    MaxIterations,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Submitted(_) => "submitted",
            Outcome::InlineSubmit(_) => "inline_submit",
            Outcome::PlainText(_) => "plain_text",
            Outcome::MaxIterations => "max_iterations",
        }
    }

    fn into_answer(self) -> String {
        match self {
            Outcome::Submitted(answer)
            | Outcome::InlineSubmit(answer)
            | Outcome::PlainText(answer) => answer,
            Outcome::MaxIterations => MAX_ITERATIONS_MESSAGE.to_string(),
        }
    }
}

/// Render an execution as the text the model sees next.
///
/// Each stream is cut to its limit in characters; empty streams are left
/// out, and `"(no output)"` stands in when both are empty.
pub fn format_report(execution: &Execution, stdout_limit: usize, stderr_limit: usize) -> String {
    let stdout = truncate_chars(&execution.stdout, stdout_limit);
    let stderr = truncate_chars(&execution.stderr, stderr_limit);

    let mut report = String::new();
    if !stdout.is_empty() {
        report.push_str(&format!("stdout:\n{}\n", stdout));
    }
    if !stderr.is_empty() {
        report.push_str(&format!("stderr:\n{}\n", stderr));
    }
    if report.is_empty() {
        report.push_str("(no output)");
    }
    report
}

/// Runs queries against a primary model and a per-run sandbox.
pub struct Engine {
    chat: Arc<dyn ChatModel>,
    sandboxes: Arc<dyn SandboxFactory>,
    config: EngineConfig,
    sub_call_limiter: Option<Arc<RateLimiter>>,
}

impl Engine {
    /// Create a new engine
    ///
    /// # Arguments
    /// * `chat` - client for both the primary and the sub-model
    /// * `sandboxes` - creates one sandbox per run
    /// * `config` - models, bounds and truncation limits
    pub fn new(
        chat: Arc<dyn ChatModel>,
        sandboxes: Arc<dyn SandboxFactory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            chat,
            sandboxes,
            config,
            sub_call_limiter: None,
        }
    }

    /// Share `limiter` across every `llm_query` issued by this engine's runs.
    pub fn with_sub_call_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.sub_call_limiter = Some(limiter);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Answer `query`.
    ///
    /// `tools` are bound into the sandbox next to `context`, `llm_query` and
    /// `SUBMIT`; `tool_prompt` describes them to the model. `on_step` sees
    /// every executed fragment and is awaited before the run continues.
    ///
    /// Only an empty query, a failed model call, or a sandbox that cannot be
    /// started is an error. Errors in the agent's code are reported to the
    /// model and never end the run.
    pub async fn run(
        &self,
        query: &str,
        context: &str,
        tools: &ToolSet,
        tool_prompt: &str,
        on_step: Option<&dyn StepObserver>,
    ) -> Result<String, EngineError> {
        let trace_id = Uuid::now_v7().to_string();
        let root_span = info_span!(
            "rlm_run",
            trace_id = %trace_id,
            model = %self.config.model,
            otel.name = "rlm_run"
        );

        let started = Instant::now();
        let result = self
            .run_inner(&trace_id, query, context, tools, tool_prompt, on_step)
            .instrument(root_span)
            .await;

        match result {
            Ok((outcome, iterations)) => {
                ENGINE_RUNS.with_label_values(&[outcome.label()]).inc();
                ENGINE_ITERATIONS.observe(iterations as f64);
                info!(
                    trace_id = %trace_id,
                    outcome = outcome.label(),
                    iterations,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Run finished"
                );
                Ok(outcome.into_answer())
            }
            Err(e) => {
                ENGINE_RUNS.with_label_values(&["error"]).inc();
                warn!(trace_id = %trace_id, error = %e, "Run failed");
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        trace_id: &str,
        query: &str,
        context: &str,
        tools: &ToolSet,
        tool_prompt: &str,
        on_step: Option<&dyn StepObserver>,
    ) -> Result<(Outcome, usize), EngineError> {
        if query.trim().is_empty() {
            return Err(EngineError::EmptyQuery);
        }
        info!(
            trace_id,
            query_len = query.len(),
            context_len = context.len(),
            tools = tools.len(),
            "Starting run"
        );

        let mut history = vec![
            ChatMessage::system(build_system_prompt(context, tool_prompt)),
            ChatMessage::user(format!("Query: {}", query)),
        ];

        let seed = Seed {
            context: context.to_string(),
            functions: HostDispatch::function_names(tools),
        };
        let host = HostDispatch {
            chat: self.chat.as_ref(),
            config: &self.config,
            tools,
            limiter: self.sub_call_limiter.as_deref(),
            trace_id,
        };
        // Started on the first fragment; plain-text answers never need one.
        let mut sandbox: Option<Box<dyn Sandbox>> = None;

        for iteration in 1..=self.config.max_iterations {
            let response = self.request_completion(&history, trace_id, iteration).await?;
            history.push(ChatMessage::assistant(response.clone()));

            let Some(code) = extract_fragment(&response) else {
                if response.contains(SUBMIT_MARKER) {
                    if let Some(answer) = extract_inline_submission(&response) {
                        return Ok((Outcome::InlineSubmit(answer), iteration));
                    }
                }
                return Ok((Outcome::PlainText(response), iteration));
            };

            let active = match sandbox.take() {
                Some(existing) => existing,
                None => self.sandboxes.create(&seed).await?,
            };
            let active = sandbox.insert(active);

            let exec_span = info_span!(
                "code_execution",
                trace_id = %trace_id,
                iteration,
                code_len = code.len(),
                otel.name = "code_execution"
            );
            let exec_started = Instant::now();
            let execution = active.execute(&code, &host).instrument(exec_span).await?;

            let report = format_report(&execution, self.config.stdout_limit, self.config.stderr_limit);
            debug!(
                trace_id,
                iteration,
                duration_ms = exec_started.elapsed().as_millis() as u64,
                raised = execution.raised.as_deref().unwrap_or(""),
                submitted = execution.submitted.is_some(),
                "Fragment executed"
            );

            let step = Step {
                iteration,
                code,
                output: report.clone(),
                has_answer: execution.submitted.is_some(),
            };
            if let Some(observer) = on_step {
                observer.on_step(&step).await;
            }

            history.push(ChatMessage::user(format!("REPL output:\n{}", report)));

            if let Some(answer) = execution.submitted {
                return Ok((Outcome::Submitted(answer), iteration));
            }
        }

        warn!(trace_id, max_iterations = self.config.max_iterations, "Max iterations reached");
        Ok((Outcome::MaxIterations, self.config.max_iterations))
    }

    async fn request_completion(
        &self,
        history: &[ChatMessage],
        trace_id: &str,
        iteration: usize,
    ) -> Result<String, EngineError> {
        let llm_span = info_span!(
            "llm_call",
            trace_id = %trace_id,
            iteration,
            model = %self.config.model,
            otel.name = "llm_call"
        );
        let request = CompletionRequest {
            model: &self.config.model,
            messages: history,
            max_tokens: self.config.max_tokens,
        };

        let started = Instant::now();
        let result = complete_with_timeout(self.chat.as_ref(), request, self.config.model_timeout)
            .instrument(llm_span)
            .await;
        let elapsed = started.elapsed();
        LLM_CALL_DURATION
            .with_label_values(&[&self.config.model, "primary"])
            .observe(elapsed.as_secs_f64());

        let response = result?;
        debug!(
            trace_id,
            iteration,
            duration_ms = elapsed.as_millis() as u64,
            response_len = response.len(),
            "Model responded"
        );
        Ok(response)
    }
}
