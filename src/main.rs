use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use frame_listener::app::Config;
use frame_listener::notify::{endpoint, Listener, WorkerExit};

const DEFAULT_POLL_MS: u64 = 250;

/// Frame Listener - loads files announced over a local WebSocket
#[derive(Parser)]
#[command(name = "frame-listener")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); defaults to the config value
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the endpoint and load announced files (default)
    Listen(ListenArgs),
    /// Run an endpoint that announces the given files to every client
    Push {
        /// Files to announce, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Address to bind (defaults to the config value)
        #[arg(long)]
        bind: Option<String>,
    },
}

#[derive(Args, Default)]
struct ListenArgs {
    /// Endpoint URL, e.g. ws://localhost:9005
    #[arg(long, env = "FRAME_LISTENER_ENDPOINT")]
    endpoint: Option<String>,
    /// Keep listening when an announced file cannot be read
    #[arg(long)]
    continue_on_file_error: bool,
    /// Refuse to load files outside this directory
    #[arg(long)]
    allowed_root: Option<PathBuf>,
    /// How often to check for a new payload, in milliseconds
    #[arg(long)]
    poll_ms: Option<u64>,
    /// Write the last payload to this file on exit
    #[arg(long)]
    dump: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: {:#}, using default config", e);
        Config::default()
    });

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level, cli.log_file.as_deref())?;

    let runtime = tokio::runtime::Runtime::new()?;

    match cli.command {
        Some(Commands::Push { files, bind }) => {
            let bind = bind.unwrap_or_else(|| config.endpoint.bind_addr.clone());
            runtime.block_on(run_push(&bind, &files))
        }
        Some(Commands::Listen(args)) => run_listen(&runtime, config, args),
        None => run_listen(&runtime, config, ListenArgs::default()),
    }
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let writer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create log file: {}", path.display()))?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
        .init();

    Ok(())
}

fn run_listen(runtime: &tokio::runtime::Runtime, config: Config, args: ListenArgs) -> Result<()> {
    let mut listener_config = config.listener;
    if let Some(endpoint) = args.endpoint {
        listener_config.endpoint = endpoint;
    }
    if args.continue_on_file_error {
        listener_config.continue_on_file_error = true;
    }
    if let Some(root) = args.allowed_root {
        listener_config.allowed_root = Some(root);
    }
    let poll_interval = Duration::from_millis(args.poll_ms.unwrap_or(DEFAULT_POLL_MS).max(1));

    let listener = Listener::new(listener_config);
    listener.register();
    listener.start();

    let slot = listener.payload_slot();
    runtime.block_on(async {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut ticker = tokio::time::interval(poll_interval);
        let mut last_data: Option<Arc<[u8]>> = None;

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Interrupted, stopping listener");
                    break;
                }
                _ = ticker.tick() => {
                    if let Some(payload) = slot.latest() {
                        let seen = last_data
                            .as_ref()
                            .is_some_and(|d| Arc::ptr_eq(d, payload.data()));
                        if !seen {
                            last_data = Some(payload.data().clone());
                            info!(
                                "New payload: {} bytes from {}",
                                payload.len(),
                                payload.source().display()
                            );
                        }
                    }
                    if !listener.is_running() {
                        break;
                    }
                }
            }
        }
    });

    match listener.stop() {
        Some(WorkerExit::Failed(e)) => warn!("Listener ended with {}: {}", e.kind(), e),
        Some(exit) => info!("Listener ended: {:?}", exit),
        None => {}
    }

    if let Some(path) = args.dump {
        match listener.get_data() {
            Some(data) => {
                std::fs::write(&path, &data[..])
                    .with_context(|| format!("Failed to write payload: {}", path.display()))?;
                info!("Wrote {} bytes to {}", data.len(), path.display());
            }
            None => warn!("No payload received, nothing written to {}", path.display()),
        }
    }

    Ok(())
}

async fn run_push(bind: &str, files: &[PathBuf]) -> Result<()> {
    tokio::select! {
        result = endpoint::serve(bind, files) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down endpoint");
            Ok(())
        }
    }
}
