use atlas_core::api::{self, AppState};
use atlas_core::config::Settings;
use atlas_core::fakes::{FakeBrowserClient, FakeLlmClient};
use atlas_core::store::{InMemoryDatabase, InMemoryVectorStore};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "atlas-core")]
#[command(about = "Knowledge ingestion and retrieval core for chat agents")]
struct Args {
    /// Server port
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Bind host
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Tokio worker threads (informational; the runtime is already started
    /// by `#[tokio::main]` with its default thread count)
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Deployment environment tag, surfaced in startup logs only
    #[arg(long, default_value = "development")]
    env: String,

    /// Start with an empty background ingestion queue and skip any
    /// startup warm-up work (for benchmarking)
    #[arg(long, default_value = "false")]
    disable_bg_jobs: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(env = args.env, workers = args.workers, "atlas-core starting");

    // Settings is read and validated eagerly so a misconfigured deployment
    // fails at startup rather than deep inside a request handler, even
    // though the collaborators wired below are still the in-memory fakes.
    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    info!(environment = settings.environment, "settings loaded");

    // Local/dev deployment wires the in-memory fakes; a production
    // deployment swaps these for a real Qdrant-like vector store, a
    // Mongo-backed `Database`, and provider-backed `LlmClient` /
    // `BrowserClient` implementations, all behind the same trait objects.
    let vectors: Arc<dyn atlas_core::store::VectorStore> = Arc::new(InMemoryVectorStore::new());
    let db: Arc<dyn atlas_core::store::Database> = Arc::new(InMemoryDatabase::new());
    let llm: Arc<dyn atlas_core::llm::LlmClient> = Arc::new(FakeLlmClient::new());
    let browser: Arc<dyn atlas_core::ingest::BrowserClient> = Arc::new(FakeBrowserClient::new());

    if args.disable_bg_jobs {
        warn!("background ingestion queue starts empty; no jobs are pre-seeded");
    }

    let state = Arc::new(AppState::new(vectors, db, llm, browser));
    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse().expect("invalid host/port");
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.unwrap();
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => error!("error waiting for shutdown signal: {err}"),
    }
}
