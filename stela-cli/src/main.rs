//! Index-builder binary: reads N-Triples / Turtle-like input from a file or
//! stdin and emits the on-disk index files.
//!
//! Exit codes: 0 success, 2 usage error, 3 I/O error, 4 corrupt index,
//! 5 query error.

mod ntriples;

use clap::Parser;
use stela_core::EngineConfig;
use stela_index::{IndexBuilder, IndexError};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "stela-index-builder",
    about = "Build a stela index from N-Triples input"
)]
struct Cli {
    /// Input file; reads stdin when omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output directory for the index files.
    #[arg(short, long)]
    output: PathBuf,

    /// Triples per permutation block.
    #[arg(long, default_value_t = 2048)]
    block_size: u32,

    /// Worker threads for geometry preprocessing (0 = hardware
    /// concurrency).
    #[arg(long, default_value_t = 0)]
    workers: u32,

    /// Externalise vocabulary strings longer than this many bytes.
    #[arg(long, default_value_t = 128)]
    externalization_threshold: u32,
}

fn init_tracing() {
    // `RUST_LOG=...` has no effect without an installed subscriber.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stela=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(exit_code(&e))
        }
    }
}

#[derive(Debug)]
enum BuildError {
    Usage(String),
    Io(String),
    Index(IndexError),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::Usage(m) | BuildError::Io(m) => write!(f, "{m}"),
            BuildError::Index(e) => write!(f, "{e}"),
        }
    }
}

fn exit_code(e: &BuildError) -> u8 {
    match e {
        BuildError::Usage(_) => 2,
        BuildError::Io(_) => 3,
        BuildError::Index(IndexError::Io(_)) => 3,
        BuildError::Index(_) => 4,
    }
}

fn run(cli: Cli) -> Result<(), BuildError> {
    let mut text = String::new();
    match &cli.input {
        Some(path) => {
            text = std::fs::read_to_string(path)
                .map_err(|e| BuildError::Io(format!("{}: {e}", path.display())))?;
        }
        None => {
            std::io::stdin()
                .read_to_string(&mut text)
                .map_err(|e| BuildError::Io(format!("stdin: {e}")))?;
        }
    }

    let triples = ntriples::parse(&text).map_err(BuildError::Usage)?;
    if triples.is_empty() {
        return Err(BuildError::Usage("input contains no triples".into()));
    }
    tracing::info!(triples = triples.len(), "parsed input");

    let config = Arc::new(EngineConfig {
        block_size: cli.block_size,
        worker_count: cli.workers,
        externalization_threshold: cli.externalization_threshold,
        ..Default::default()
    });
    let manifest = IndexBuilder::new(config)
        .build(&cli.output, triples)
        .map_err(BuildError::Index)?;

    println!(
        "built index in {}: {} triples, {} vocabulary entries, {} geometries \
         ({} invalid WKT literals)",
        cli.output.display(),
        manifest.triple_count,
        manifest.vocab_size,
        manifest.geo_vocab_size,
        manifest.invalid_wkt_literals,
    );
    Ok(())
}
