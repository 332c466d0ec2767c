//! scribe-ds - transcription data server
//!
//! Coordinates transcription workers and training clients over a shared
//! podcast catalog.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scribe_common::config::ServerConfig;
use scribe_common::db::{init_database, DbProxy};
use scribe_ds::{build_router, AppState};

/// Command-line arguments for scribe-ds
#[derive(Parser, Debug)]
#[command(name = "scribe-ds")]
#[command(about = "Transcription work distribution and training session server")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database file
    #[arg(long)]
    database: Option<PathBuf>,

    /// Training session backend: memory, redis or sql
    #[arg(long)]
    session_backend: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scribe_ds=info,scribe_common=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting scribe-ds v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    // CLI > env > file > defaults
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.listen_host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(backend) = args.session_backend {
        config.session_backend = backend.parse()?;
    }
    config.validate()?;

    info!("Database path: {}", config.database_path.display());
    let pool = match init_database(&config.database_path, config.max_connections).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };
    let db = DbProxy::new(pool.clone());

    let state = AppState::from_config(&config, db)
        .await
        .context("Failed to initialize service")?;
    info!(backend = state.sessions.backend_name(), "Training session store ready");

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.listen_host, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.listen_host, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("scribe-ds listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    pool.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
