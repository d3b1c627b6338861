//! archiver-daemon - bounded-concurrency archive task service
//!
//! Accepts archive tasks over HTTP, fetches up to a fixed number of files
//! per task and packs them into one zip archive per task.
//!
//! # Configuration
//!
//! Settings are read from a TOML file (`--config`, default
//! `archiver.toml`). A missing file falls back to built-in defaults;
//! `--host` and `--port` override the file.
//!
//! # Shutdown
//!
//! SIGINT or SIGTERM stops accepting connections. In-flight requests get
//! `server.shutdown_grace_secs` to finish before the process exits.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use archiver_core::{ArchiverConfig, HttpFetcher, TaskRegistry};
use archiver_daemon::{AppState, router};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// archiver daemon - zip archive task service
#[derive(Parser, Debug)]
#[command(name = "archiver-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "archiver.toml")]
    config: PathBuf,

    /// Address to listen on (overrides `server.host`)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides `server.port`)
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Runtime::new().context("failed to create Tokio runtime")?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    init_logging(&args)?;

    let mut config = load_config(&args.config)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate().context("invalid configuration")?;

    let fetcher = HttpFetcher::new(&config.fetch).context("failed to build HTTP client")?;
    let mut registry = TaskRegistry::new(config.limits, Arc::new(fetcher));
    if let Some(root) = &config.server.archive_root {
        registry = registry.with_archive_root(root);
    }
    let state = AppState::new(Arc::new(registry), config.server.request_timeout());
    let app = router(state, &config.server.base_path);

    let bind_address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    let addr = listener
        .local_addr()
        .context("failed to read listener address")?;

    info!(
        addr = %addr,
        base_path = %config.server.base_path,
        max_active_tasks = config.limits.max_active_tasks,
        max_files_per_task = config.limits.max_files_per_task,
        "archiver daemon listening"
    );

    let (shutdown_tx, mut server_rx) = watch::channel(false);
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_rx.changed().await;
            })
            .await
    });

    tokio::select! {
        result = &mut server => {
            return match result {
                Ok(Ok(())) => {
                    info!("HTTP server exited");
                    Ok(())
                },
                Ok(Err(e)) => Err(e).context("HTTP server error"),
                Err(e) => Err(e).context("HTTP server task failed"),
            };
        }
        signal = shutdown_signal() => {
            signal?;
        }
    }

    let _ = shutdown_tx.send(true);

    let grace = config.server.shutdown_grace();
    match tokio::time::timeout(grace, &mut server).await {
        Ok(Ok(Ok(()))) => info!("Shutdown complete"),
        Ok(Ok(Err(e))) => error!(error = %e, "HTTP server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "HTTP server task failed during shutdown"),
        Err(_) => {
            warn!(
                grace_secs = grace.as_secs(),
                "in-flight requests did not finish within the shutdown grace period"
            );
            server.abort();
        },
    }

    Ok(())
}

/// Install the tracing subscriber: stdout by default, an appended file with
/// `--log-file`.
fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

/// Load the configuration file, or the defaults when it does not exist.
fn load_config(path: &std::path::Path) -> Result<ArchiverConfig> {
    if path.exists() {
        let config = ArchiverConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    } else {
        warn!(path = %path.display(), "configuration file not found, using defaults");
        Ok(ArchiverConfig::default())
    }
}

/// Resolve once SIGINT or SIGTERM arrives.
async fn shutdown_signal() -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }
    Ok(())
}
