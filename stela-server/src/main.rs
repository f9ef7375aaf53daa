//! SPARQL HTTP endpoint.
//!
//! Serves GET/POST `application/sparql-query` against a loaded index. The
//! response body is streamed from the operator pump running on a blocking
//! thread; the content type follows the `Accept` header (TSV, CSV or
//! SPARQL results JSON). `/status` reports the delta-triples counts.
//!
//! Exit codes: 0 success, 2 usage error, 3 I/O error, 4 corrupt index.

mod routes;

use clap::Parser;
use stela_core::EngineConfig;
use stela_index::{Index, IndexError};
use stela_query::MaterializedViewsManager;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "stela-server", about = "Serve SPARQL over a stela index")]
struct Cli {
    /// Index directory produced by stela-index-builder.
    #[arg(short, long)]
    index: PathBuf,

    /// Listen address.
    #[arg(short, long, default_value = "127.0.0.1:7001")]
    listen: String,

    /// Memory budget for intermediate query results, in megabytes.
    #[arg(long, default_value_t = 4096)]
    memory_budget_mb: usize,
}

/// Shared server state.
pub struct AppState {
    pub index: Arc<Index>,
    pub views: Arc<MaterializedViewsManager>,
    pub budget_bytes: usize,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stela=info,tower_http=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = Arc::new(EngineConfig::default());
    let index = match Index::open(&cli.index, config) {
        Ok(index) => Arc::new(index),
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(match e {
                IndexError::Io(_) => 3,
                _ => 4,
            });
        }
    };

    let state = Arc::new(AppState {
        index,
        views: Arc::new(MaterializedViewsManager::new()),
        budget_bytes: cli.memory_budget_mb * 1024 * 1024,
    });

    let app = routes::router(state);
    let listener = match tokio::net::TcpListener::bind(&cli.listen).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("error: cannot bind {}: {e}", cli.listen);
            return ExitCode::from(3);
        }
    };
    tracing::info!(listen = %cli.listen, "serving SPARQL endpoint");
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("error: {e}");
        return ExitCode::from(3);
    }
    ExitCode::SUCCESS
}
