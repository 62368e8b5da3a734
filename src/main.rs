use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use clickpulse::api;
use clickpulse::config::Config;
use clickpulse::context::AppContext;
use clickpulse::ingest::{IngestSettings, IngestionLoop, KafkaSource};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    let ctx = Arc::new(AppContext::connect(config).await?);

    let source = KafkaSource::new(&ctx.config.kafka).context("failed to open Kafka consumer")?;
    let ingestion = IngestionLoop::new(
        source,
        Arc::clone(&ctx.aggregator),
        IngestSettings::from(&ctx.config.ingest),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_tx.send_replace(true);
    });

    let ingest_handle = tokio::spawn(ingestion.run(shutdown_rx.clone()));

    let api_router = api::create_api_router(Arc::clone(&ctx));
    let api_addr = format!("{}:{}", ctx.config.api_server.host, ctx.config.api_server.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!("🚀 API server listening on http://{}", api_addr);

    let mut api_shutdown = shutdown_rx;
    axum::serve(api_listener, api_router)
        .with_graceful_shutdown(async move {
            if api_shutdown.wait_for(|stop| *stop).await.is_err() {
                warn!("Shutdown channel closed");
            }
        })
        .await?;
    info!("API server stopped");

    match ingest_handle.await {
        Ok(stats) => info!(
            processed = stats.processed,
            failed = stats.failed,
            abandoned = stats.abandoned,
            "Click ingestion stopped"
        ),
        Err(err) => error!(error = %err, "Click ingestion task panicked"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining click ingestion");
}
