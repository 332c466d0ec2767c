//! scribe-worker - transcription worker
//!
//! Pulls untranscribed episodes from scribe-ds and uploads transcripts
//! produced by an external command.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scribe_worker::transcriber::CommandTranscriber;
use scribe_worker::{Worker, WorkerConfig};

/// Command-line arguments for scribe-worker
#[derive(Parser, Debug)]
#[command(name = "scribe-worker")]
#[command(about = "Transcription worker for scribe-ds")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// scribe-ds root URL
    #[arg(short, long)]
    server: Option<String>,

    /// Language code to request work for
    #[arg(short, long)]
    language: Option<String>,

    /// Model identifier recorded with uploads
    #[arg(short, long)]
    model: Option<String>,

    /// Fetch audio from the LAN-local cache URL
    #[arg(long)]
    use_local_url: bool,

    /// Exit after this many completed jobs
    #[arg(long)]
    max_jobs: Option<u64>,

    /// Transcriber program and arguments; `{audio}`, `{language}` and
    /// `{prompt}` are substituted
    #[arg(last = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scribe_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting scribe-worker v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    // CLI > env > file > defaults
    let mut config = WorkerConfig::load(args.config.as_deref())?;
    if let Some(server) = args.server {
        config.server_url = server;
    }
    if let Some(language) = args.language {
        config.language = language;
    }
    if let Some(model) = args.model {
        config.model = model;
    }
    if args.use_local_url {
        config.use_local_url = true;
    }
    if args.max_jobs.is_some() {
        config.max_jobs = args.max_jobs;
    }
    if !args.command.is_empty() {
        config.command = args.command;
    }
    config.validate()?;

    let (program, program_args) = config
        .command
        .split_first()
        .context("Transcriber command is empty")?;
    let transcriber = Arc::new(CommandTranscriber::new(
        program.clone(),
        program_args.to_vec(),
        config.model.clone(),
    ));

    info!("Server: {}", config.server_url);
    let worker = Worker::new(config, transcriber).context("Failed to create worker")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
        // Keep the sender alive so the worker sees `true`, not a closed channel
        std::future::pending::<()>().await;
    });

    let stats = worker.run(shutdown_rx).await;
    info!(
        "Worker finished: {} completed, {} failed",
        stats.completed, stats.failed
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, releasing work and stopping"),
        _ = terminate => info!("Received terminate signal, releasing work and stopping"),
    }
}
