//! Framepipe runner entrypoint.
//!
//! Bootstrap only: parse flags and settings, initialize logging, load the
//! graph adapter (local library or remote service), wire the engine and the
//! in-process client host, then park. All pipeline behavior lives in the
//! library crates.

mod settings;

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use anyhow::{anyhow, Result};
use clap::Parser;
use pipe_client::ClientHost;
use pipe_engine::{
    ClientEngineInterface, ClientInterface, Engine, EngineSettings, LoggingDisplay,
};
use pipe_graph::{
    local_graph_from_library, remote_graph_from_address, PrebuiltEngineInterface, PrebuiltGraph,
};
use pipe_types::{ClientState, INVALID_ID};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "framepipe", version, about = "Compute pipeline runner")]
struct Args {
    /// Settings file path (overrides discovery of `framepipe.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Prebuilt graph shared library (local mode).
    #[arg(long = "graph-lib")]
    graph_lib: Option<PathBuf>,
    /// Remote graph service address (remote mode).
    #[arg(long = "graph-remote")]
    graph_remote: Option<String>,
    /// Output stream to mirror to the debug display.
    #[arg(long = "display-stream")]
    display_stream: Option<i32>,
    /// Write logs to daily-rotated files in this directory instead of
    /// standard error.
    #[arg(long = "log-dir")]
    log_dir: Option<PathBuf>,
}

fn init_logging(log_dir: Option<&std::path::Path>) -> Option<WorkerGuard> {
    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "framepipe.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .init();
            None
        }
    }
}

/// Logs state transitions; a transport binding would forward these to the
/// connected client instead.
struct LoggingStateListener;

impl pipe_client::StateListener for LoggingStateListener {
    fn on_state_change(&self, state: ClientState) {
        info!(target: "runner.boot", state = ?state, "pipe_state");
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.log_dir.as_deref());
    let file = settings::load(args.config.as_deref())?;

    let display_stream_id = args
        .display_stream
        .or(file.display_stream_id)
        .unwrap_or(INVALID_ID);
    let profiling_dir = file
        .profiling_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("profiling"));

    let engine = Engine::new(EngineSettings {
        display_stream_id,
        ignore_input_manager: file.ignore_input_manager,
    });
    let engine_hooks = Arc::downgrade(&engine) as Weak<dyn PrebuiltEngineInterface>;

    let graph_lib = args.graph_lib.or(file.graph.library);
    let graph_remote = args.graph_remote.or(file.graph.remote);
    let graph: Arc<dyn PrebuiltGraph> = match (graph_lib, graph_remote) {
        (Some(path), None) => {
            info!(target: "runner.boot", library = %path.display(), "loading_local_graph");
            local_graph_from_library(&path, engine_hooks)
                .map_err(|e| anyhow!("loading graph library {}: {e}", path.display()))?
        }
        (None, Some(address)) => {
            info!(target: "runner.boot", %address, "connecting_remote_graph");
            remote_graph_from_address(&address, engine_hooks)
                .map_err(|e| anyhow!("connecting to graph service {address}: {e}"))?
        }
        (Some(_), Some(_)) => {
            anyhow::bail!("configure either a graph library or a remote address, not both")
        }
        (None, None) => anyhow::bail!("no graph configured; set --graph-lib or --graph-remote"),
    };
    let graph_options = graph.graph_options();
    engine.set_graph(graph);

    if display_stream_id != INVALID_ID {
        engine.set_display(Arc::new(LoggingDisplay::new()));
    }

    let host = ClientHost::new(graph_options.clone(), profiling_dir);
    host.set_engine(Arc::downgrade(&engine) as Weak<dyn ClientEngineInterface>);
    engine.set_client(Arc::clone(&host) as Arc<dyn ClientInterface>);
    host.init(Arc::new(LoggingStateListener))
        .map_err(|e| anyhow!("client host init: {e}"))?;

    engine
        .activate()
        .map_err(|e| anyhow!("engine activation: {e}"))?;
    info!(
        target: "runner.boot",
        graph = %graph_options.graph_name,
        "runner_online"
    );

    // The process stays up until the service manager kills it.
    loop {
        std::thread::park();
    }
}
