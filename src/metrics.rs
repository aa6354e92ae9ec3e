//! Prometheus metrics for the agent loop, sandbox and sessions
//!
//! All collectors live in the default registry; [`gather_text`] renders them
//! in the text exposition format for whatever endpoint the host exposes.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, register_int_gauge,
    CounterVec, Encoder, Histogram, HistogramVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Engine
    // ─────────────────────────────────────────────────────────────────────────────

    /// Finished runs by outcome.
    ///
    /// Labels:
    /// - outcome: "submitted", "plain_text", "inline_submit", "max_iterations", "error"
    pub static ref ENGINE_RUNS: CounterVec = register_counter_vec!(
        "rlm_engine_runs_total",
        "Engine runs by terminal outcome",
        &["outcome"]
    ).expect("failed to register ENGINE_RUNS metric");

    /// Iterations consumed per run.
    pub static ref ENGINE_ITERATIONS: Histogram = register_histogram!(
        "rlm_engine_iterations",
        "Iterations consumed per engine run",
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 10.0, 15.0, 20.0, 30.0]
    ).expect("failed to register ENGINE_ITERATIONS metric");

    /// Model call latency.
    ///
    /// Labels:
    /// - model: model name
    /// - kind: "primary" or "sub"
    pub static ref LLM_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "rlm_llm_call_duration_seconds",
        "Model completion latency",
        &["model", "kind"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("failed to register LLM_CALL_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Sandbox
    // ─────────────────────────────────────────────────────────────────────────────

    /// Fragment executions by status.
    ///
    /// Labels:
    /// - status: "ok", "raised", "timeout", "worker_exited"
    pub static ref SANDBOX_EXECUTIONS: CounterVec = register_counter_vec!(
        "rlm_sandbox_executions_total",
        "Sandbox fragment executions by status",
        &["status"]
    ).expect("failed to register SANDBOX_EXECUTIONS metric");

    /// Wall-clock time of one fragment execution, host calls included.
    pub static ref SANDBOX_EXECUTION_DURATION: Histogram = register_histogram!(
        "rlm_sandbox_execution_duration_seconds",
        "Sandbox fragment execution duration",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 120.0]
    ).expect("failed to register SANDBOX_EXECUTION_DURATION metric");

    /// Worker processes replaced after a timeout or crash.
    pub static ref SANDBOX_WORKER_RESTARTS: CounterVec = register_counter_vec!(
        "rlm_sandbox_worker_restarts_total",
        "Sandbox worker restarts by reason",
        &["reason"]
    ).expect("failed to register SANDBOX_WORKER_RESTARTS metric");

    /// Calls from sandboxed code back into the host.
    ///
    /// Labels:
    /// - function: "llm_query" or a tool name
    /// - result: "ok", "failed", "upstream"
    pub static ref HOST_CALLS: CounterVec = register_counter_vec!(
        "rlm_host_calls_total",
        "Host function calls issued by sandboxed code",
        &["function", "result"]
    ).expect("failed to register HOST_CALLS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Tools & sessions
    // ─────────────────────────────────────────────────────────────────────────────

    /// Per-scope search failures contained by search_docs.
    pub static ref TOOL_SCOPE_ERRORS: CounterVec = register_counter_vec!(
        "rlm_tool_scope_errors_total",
        "Search scopes that failed inside search_docs",
        &["tool"]
    ).expect("failed to register TOOL_SCOPE_ERRORS metric");

    /// Sessions currently cached.
    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "rlm_sessions_active",
        "Per-user tool sessions currently cached"
    ).expect("failed to register SESSIONS_ACTIVE metric");
}

/// Render every registered metric in the Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
