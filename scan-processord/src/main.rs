mod api;
mod config;
mod ingest;
mod store;
mod store_manager;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::ingest::processor::Processor;
use crate::store_manager::StoreHandle;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scan_processord=info"))
        )
        .init();

    tracing::info!("Starting scan-processord");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/scan-processor/processord.toml".to_string());

    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    config.apply_env();
    config.validate().context("Invalid configuration")?;

    tracing::info!("Loaded config from {}", config_path);

    let store = StoreHandle::spawn(&config.store)?;
    let processor = Arc::new(Processor::new(Arc::new(store.clone())));

    let app_state = api::routes::AppState {
        processor,
        store: store.clone(),
        config: Arc::new(config.ingest.clone()),
    };
    let app = api::routes::router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.ingest.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.ingest.listen))?;

    tracing::info!("Accepting pushes on {}", config.ingest.listen);

    let cancel = CancellationToken::new();

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();

    // In-flight pushes finish before the store stops taking work
    if let Err(e) = server_handle.await {
        tracing::error!("Server task failed: {}", e);
    }

    if let Err(e) = store.shutdown().await {
        tracing::error!("Failed to shutdown store: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
