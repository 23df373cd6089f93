//! `harmony`: load a graph base and drive it from an interactive console.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use harmony_graph::{text, Console, EngineConfig, Graph, SharedRuntime};

#[derive(Debug, Parser)]
#[command(name = "harmony", version, about = "Interactive console for a harmony graph base")]
struct Args {
    /// Graph text file or base directory to load.
    path: Option<PathBuf>,

    /// Log filter for stderr; overrides RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,

    /// Disable colored log output.
    #[arg(long)]
    no_color: bool,

    /// Engine configuration as a JSON file.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter = match &args.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(!args.no_color)
        .init();

    match run(&args) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(leaked) => {
            error!(leaked, "nodes leaked at exit");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> harmony_graph::Result<usize> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let graph = match &args.path {
        Some(path) => text::build_base(path)?,
        None => Graph::with_root(),
    };
    info!(nodes = graph.live_count(), "base loaded");

    let mut console = Console::new(SharedRuntime::from_graph(graph, config));
    console.run(io::stdin().lock(), &mut io::stdout())?;
    Ok(console.shutdown())
}
