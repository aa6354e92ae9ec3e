//! rlm: answer one query against a data fixture and print the frame stream
//!
//! Each frame is one JSON object per line on stdout; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_stream::StreamExt;

use rlm_engine::llm::ModelBackend;
use rlm_engine::metrics;
use rlm_engine::security::RateLimiter;
use rlm_engine::store::MemoryStore;
use rlm_engine::tracing::{init_tracing, shutdown_tracing};
use rlm_engine::transport::{stream_query, StreamFrame};
use rlm_engine::{DataScope, Engine, PythonSandboxFactory, SessionManager, Settings};

#[derive(Parser)]
#[command(name = "rlm", version, about = "Answer a query with a code-writing model agent")]
struct Args {
    /// JSON fixture with knowledge bases, files and chunks.
    #[arg(long, env = "RLM_DATA")]
    data: PathBuf,

    /// User whose data the tools are scoped to.
    #[arg(long, env = "RLM_USER")]
    user: String,

    /// File bound as `context` in the sandbox.
    #[arg(long)]
    context_file: Option<PathBuf>,

    /// OTLP collector for span export; overrides OTEL_EXPORTER_OTLP_ENDPOINT.
    #[arg(long)]
    otlp: Option<String>,

    /// Print Prometheus metrics to stderr when the run ends.
    #[arg(long)]
    metrics: bool,

    /// The query to answer.
    query: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    let settings = Settings::from_env()?;

    let otlp = args.otlp.clone().or_else(|| settings.otlp_endpoint.clone());
    init_tracing("rlm", otlp.as_deref())?;

    let backend = ModelBackend::from_settings(&settings.llm);
    let store = Arc::new(MemoryStore::load(&args.data, backend.embedder.as_ref()).await?);
    let context = match &args.context_file {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => String::new(),
    };

    let sandboxes = Arc::new(PythonSandboxFactory::new(settings.sandbox.clone())?);
    let mut engine = Engine::new(backend.chat.clone(), sandboxes, settings.engine.clone());
    if let Some(limit) = &settings.sub_call_limit {
        engine = engine.with_sub_call_limiter(Arc::new(RateLimiter::new(
            limit.burst,
            limit.per_second,
        )));
    }

    let sessions = SessionManager::new(backend.embedder.clone());
    let scope = DataScope {
        files: store.clone(),
        search: store,
    };
    let session = sessions.get_or_create(&args.user, scope).await?;

    tracing::info!(
        user_id = %args.user,
        model = %settings.engine.model,
        sub_model = %settings.engine.sub_model,
        "Answering query"
    );

    let mut failed = false;
    let mut frames = stream_query(Arc::new(engine), session, args.query, context);
    while let Some(frame) = frames.next().await {
        failed |= matches!(frame, StreamFrame::Error { .. });
        println!("{}", frame.to_json());
    }

    if args.metrics {
        eprintln!("{}", metrics::gather_text());
    }
    shutdown_tracing();

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
