//! Local synchronization of queued data points
//!
//! This module provides:
//! - [`LocalSynchronizer`], a cloneable handle used to enqueue points and request passes
//! - [`SyncWorker`], the single task that runs passes and owns the store write path
//! - Coalesced triggers and retry with exponential backoff after a failed pass

mod worker;


pub use worker::SyncWorker;

use crate::error::{ErrorKind, QueueError, SyncError};
use crate::health::HealthRegistry;
use crate::models::{DataPoint, DataPointConvertible};
use crate::observability::{IngestMetrics, StructuredLogger};
use crate::queue::{DurableQueue, QueueEntry};
use crate::store::LocalStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Notify, RwLock};
use tokio::task::JoinHandle;

/// Configuration for the synchronizer
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Delay before the first retry after a failed pass
    pub initial_backoff: Duration,
    /// Cap for the doubling retry delay
    pub max_backoff: Duration,
    /// Pending on-demand requests before `sync_now` callers wait
    pub command_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300), // 5 minutes
            command_buffer: 32,
        }
    }
}

/// Whether a pass is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Syncing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Nothing was pending
    Empty,
}

/// Result of one sync pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum SyncOutcome {
    Skipped(SkipReason),
    /// The batch is in the store. `committed` counts snapshot entries,
    /// `inserted` the rows that were new.
    Committed {
        committed: usize,
        inserted: usize,
        removal_failures: usize,
    },
    /// Nothing was committed; entries stay queued and a retry is scheduled
    Failed(ErrorKind),
}

impl SyncOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, SyncOutcome::Committed { .. })
    }
}

/// Counters across the synchronizer's lifetime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    /// Passes that committed a batch
    pub passes: u64,
    pub committed: u64,
    pub failures: u64,
    pub removal_failures: u64,
    /// Failures since the last committed pass
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_pass_at: Option<DateTime<Utc>>,
}

pub(crate) enum Command {
    SyncNow(oneshot::Sender<SyncOutcome>),
    Shutdown,
}

/// Handle to a running synchronizer. Clones share the same worker.
#[derive(Clone)]
pub struct LocalSynchronizer {
    queue: DurableQueue,
    trigger: Arc<Notify>,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SyncState>,
    stats: Arc<RwLock<SyncStats>>,
    metrics: IngestMetrics,
}

impl std::fmt::Debug for LocalSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSynchronizer")
            .field("queue", &self.queue)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl LocalSynchronizer {
    /// Create a builder over `queue` and `store`
    pub fn builder(queue: DurableQueue, store: Arc<dyn LocalStore>) -> SynchronizerBuilder {
        SynchronizerBuilder::new(queue, store)
    }

    /// Build with defaults and spawn the worker on the current runtime
    pub fn spawn(queue: DurableQueue, store: Arc<dyn LocalStore>) -> (Self, JoinHandle<()>) {
        let (sync, worker) = Self::builder(queue, store).build();
        let handle = tokio::spawn(worker.run());
        (sync, handle)
    }

    pub fn queue(&self) -> &DurableQueue {
        &self.queue
    }

    /// Request a pass. Requests made while a pass runs collapse into one follow-up pass.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Durably enqueue a point, then trigger a pass.
    ///
    /// Returns once the point is on disk, not when it is committed.
    pub async fn add_data_point(&self, point: DataPoint) -> Result<QueueEntry, QueueError> {
        let entry = self.queue.add(point).await?;
        self.metrics.inc_enqueued();
        self.metrics.set_queue_depth(self.queue.len());
        self.trigger();
        Ok(entry)
    }

    /// Validate a raw JSON value and enqueue it
    pub async fn add_value(&self, value: Value) -> Result<QueueEntry, QueueError> {
        self.add_data_point(DataPoint::from_value(value)?).await
    }

    /// Convert, then enqueue as [`LocalSynchronizer::add_data_point`]
    pub async fn add_convertible<C>(&self, item: &C) -> Result<QueueEntry, QueueError>
    where
        C: DataPointConvertible + ?Sized,
    {
        self.add_data_point(item.to_data_point()).await
    }

    /// Run a pass now and wait for its outcome.
    ///
    /// The pass runs on the worker after any in-flight pass finishes.
    pub async fn sync_now(&self) -> Result<SyncOutcome, SyncError> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::SyncNow(reply))
            .await
            .map_err(|_| SyncError::Stopped)?;
        outcome.await.map_err(|_| SyncError::Stopped)
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    pub async fn stats(&self) -> SyncStats {
        self.stats.read().await.clone()
    }

    /// Stop the worker once any in-flight pass has finished
    pub async fn shutdown(&self) {
        // An error means the worker is already gone
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

/// Builder for a [`LocalSynchronizer`] and its [`SyncWorker`]
pub struct SynchronizerBuilder {
    queue: DurableQueue,
    store: Arc<dyn LocalStore>,
    config: SyncConfig,
    health: Option<HealthRegistry>,
    logger: StructuredLogger,
}

impl SynchronizerBuilder {
    pub fn new(queue: DurableQueue, store: Arc<dyn LocalStore>) -> Self {
        Self {
            queue,
            store,
            config: SyncConfig::default(),
            health: None,
            logger: StructuredLogger::new("ingest"),
        }
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.config.initial_backoff = backoff;
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.config.max_backoff = backoff;
        self
    }

    /// Report queue and store health to `registry`
    pub fn health(mut self, registry: HealthRegistry) -> Self {
        self.health = Some(registry);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Create the handle and the worker. The worker does nothing until run.
    pub fn build(self) -> (LocalSynchronizer, SyncWorker) {
        let trigger = Arc::new(Notify::new());
        let (commands_tx, commands_rx) = mpsc::channel(self.config.command_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(SyncState::Idle);
        let stats = Arc::new(RwLock::new(SyncStats::default()));
        let metrics = IngestMetrics::new();

        let handle = LocalSynchronizer {
            queue: self.queue.clone(),
            trigger: Arc::clone(&trigger),
            commands: commands_tx,
            state: state_rx,
            stats: Arc::clone(&stats),
            metrics: metrics.clone(),
        };

        let worker = SyncWorker::new(
            self.queue,
            self.store,
            self.config,
            trigger,
            commands_rx,
            state_tx,
            stats,
            metrics,
            self.health,
            self.logger,
        );

        (handle, worker)
    }
}
