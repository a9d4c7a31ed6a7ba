use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use activity_trail_api::config::{BackendKind, Config};
use activity_trail_api::retention::spawn_sweeper;
use activity_trail_api::store::{ActivityStore, RingBufferStore, SqliteStore};
use activity_trail_api::{create_router, AppState};

/// Activity trail HTTP API
#[derive(Debug, Parser)]
#[command(name = "activity-trail-api", version, about)]
struct Cli {
    /// Config file (defaults to ./activity-trail.toml when present)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Log filter, overridden by RUST_LOG
    #[arg(long)]
    log_level: Option<String>,

    /// Listen address, e.g. 0.0.0.0:3001
    #[arg(long)]
    bind: Option<String>,

    /// Storage backend: memory or sqlite
    #[arg(long)]
    backend: Option<BackendKind>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(backend) = cli.backend {
        config.storage.backend = backend;
    }
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    let store = build_store(&config);
    let _sweeper = spawn_sweeper(Arc::clone(&store), config.retention.clone());

    let app = create_router(AppState::new(store, config.query.clone()));

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {:?}", config.server.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, backend = ?config.storage.backend, "activity trail API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("server stopped");
    Ok(())
}

/// The sqlite store opens lazily, so an unreachable file only degrades
/// requests to 503 until it becomes reachable.
fn build_store(config: &Config) -> Arc<dyn ActivityStore> {
    match config.storage.backend {
        BackendKind::Memory => {
            info!(capacity = config.storage.ring_capacity, "using in-memory ring buffer");
            Arc::new(RingBufferStore::new(config.storage.ring_capacity))
        }
        BackendKind::Sqlite => {
            let store = SqliteStore::new(config.storage.sqlite_path.clone());
            match store.ensure_ready() {
                Ok(()) => info!(path = %store.path().display(), "using sqlite store"),
                Err(e) => warn!(
                    path = %store.path().display(),
                    error = %e,
                    "sqlite store not ready yet; will retry on demand"
                ),
            }
            Arc::new(store)
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
