//! Commands on the local queue and store

use anyhow::{Context, Result};
use ingest_lib::{
    DurableQueue, LocalStore, LocalSynchronizer, QueueConfig, SqliteStore, StoreConfig,
};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::Tabled;

use super::read_json;
use crate::output::{print_rows, print_sync_outcome, report, Mark, OutputFormat};

/// Where the local queue and database live
#[derive(Debug, Clone)]
pub struct LocalPaths {
    pub queue_dir: PathBuf,
    pub database_path: PathBuf,
}

impl LocalPaths {
    async fn open_queue(&self) -> Result<DurableQueue> {
        DurableQueue::open(QueueConfig::new(&self.queue_dir))
            .await
            .with_context(|| format!("Failed to open queue at {}", self.queue_dir.display()))
    }

    fn store(&self) -> SqliteStore {
        SqliteStore::new(StoreConfig::new(&self.database_path))
    }
}

/// Enqueue a data point, then run one sync pass into the local store
pub async fn enqueue(paths: &LocalPaths, file: &Path, format: OutputFormat) -> Result<()> {
    let value = read_json(file)?;
    let queue = paths.open_queue().await?;
    let entry = queue
        .add_value(value)
        .await
        .context("Failed to enqueue data point")?;

    // Also replays anything an earlier run left queued
    let (synchronizer, worker) = LocalSynchronizer::spawn(queue, Arc::new(paths.store()));
    let outcome = synchronizer.sync_now().await;
    synchronizer.shutdown().await;
    worker.await.context("Sync worker failed")?;
    let outcome = outcome.context("Sync pass did not run")?;

    format.render(&json!({ "seq": entry.id, "sync": outcome }), || {
        report(Mark::Note, &format!("Enqueued as #{}", entry.id));
        print_sync_outcome(&outcome);
    });
    Ok(())
}

/// Row for the status table
#[derive(Debug, Tabled, Serialize)]
struct StatusRow {
    #[tabled(rename = "Queue")]
    queue_dir: String,
    #[tabled(rename = "Pending")]
    pending: usize,
    #[tabled(rename = "Database")]
    database: String,
    #[tabled(rename = "Committed")]
    committed: u64,
}

/// Show queue depth and committed point count
pub async fn status(paths: &LocalPaths, format: OutputFormat) -> Result<()> {
    let queue = paths.open_queue().await?;
    let store = paths.store();
    let handle = store
        .open()
        .await
        .with_context(|| format!("Failed to open {}", paths.database_path.display()))?;
    let committed = handle.count().await.context("Failed to count data points")?;

    let row = StatusRow {
        queue_dir: paths.queue_dir.display().to_string(),
        pending: queue.len(),
        database: paths.database_path.display().to_string(),
        committed,
    };
    format.render(&row, || print_rows(std::slice::from_ref(&row)));
    Ok(())
}
