//! Logging and optional OpenTelemetry export
//!
//! ```text
//! rlm_run ─┬─ llm_call
//!          ├─ code_execution ── sub_llm_call
//!          └─ ...
//! ```
//!
//! Every span carries the run's `trace_id`, so the console log and the
//! exported trace line up. Log lines go to stderr; stdout belongs to the
//! frame stream.

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,rlm_engine=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn fmt_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Install the global subscriber.
///
/// With an `otlp_endpoint`, spans are also batched to that collector over
/// gRPC; without one only the console layer is installed.
///
/// # Example
/// ```ignore
/// init_tracing("rlm", Some("http://localhost:4317"))?;
/// ```
pub fn init_tracing(
    service_name: &str,
    otlp_endpoint: Option<&str>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let Some(endpoint) = otlp_endpoint else {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt_layer())
            .try_init()?;
        return Ok(());
    };

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(vec![
            KeyValue::new("service.name", service_name.to_string()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])))
        .install_batch(runtime::Tokio)?;

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer())
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()?;

    tracing::info!(
        service = service_name,
        endpoint = endpoint,
        "OpenTelemetry tracing initialized"
    );
    Ok(())
}

/// Flush pending spans to the collector.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
