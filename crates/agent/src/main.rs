//! Ingest Agent - durable data point ingestion daemon
//!
//! Accepts data points over a local HTTP API, persists them in the durable
//! queue and keeps the local store in sync.

use anyhow::{Context, Result};
use ingest_agent::{api, config::AgentConfig};
use ingest_lib::{
    health::{Component, HealthRegistry},
    observability::{IngestMetrics, StructuredLogger},
    queue::DurableQueue,
    store::SqliteStore,
    sync::LocalSynchronizer,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting ingest-agent");

    let config = AgentConfig::load()?;
    info!(
        instance = %config.instance_name,
        queue_dir = %config.queue_dir.display(),
        database = %config.database_path().display(),
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    for component in Component::ALL {
        health_registry.register(component).await;
    }

    let metrics = IngestMetrics::new();
    let logger = StructuredLogger::new(&config.instance_name);

    let queue = DurableQueue::open(config.queue_config())
        .await
        .with_context(|| format!("Failed to open queue at {}", config.queue_dir.display()))?;
    metrics.set_queue_depth(queue.len());
    logger.log_queue_recovered(queue.len(), queue.path());

    let store = Arc::new(SqliteStore::new(config.store_config()));
    let (synchronizer, worker) = LocalSynchronizer::builder(queue.clone(), store)
        .config(config.sync_config())
        .health(health_registry.clone())
        .logger(logger.clone())
        .build();
    let worker_handle = tokio::spawn(worker.run());

    // Replay anything a previous run left behind
    synchronizer.trigger();

    let ticker = {
        let synchronizer = synchronizer.clone();
        let interval = config.sync_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                synchronizer.trigger();
            }
        })
    };

    logger.log_startup(AGENT_VERSION, queue.len());

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics.clone(),
        synchronizer.clone(),
    ));

    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Ok(())) => logger.log_shutdown("API server exited"),
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    logger.log_shutdown("API server failed");
                }
                Err(e) => error!(error = %e, "API server task panicked"),
            }
        }
    }

    health_registry.set_ready(false).await;
    ticker.abort();
    synchronizer.shutdown().await;
    if let Err(e) = worker_handle.await {
        error!(error = %e, "Sync worker task failed");
    }
    info!(pending = queue.len(), "Shut down");

    Ok(())
}
