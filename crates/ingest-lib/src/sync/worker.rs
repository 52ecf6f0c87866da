//! The task that runs sync passes.
//!
//! Only this task touches the local store or changes [`SyncState`], so at
//! most one pass is in flight per synchronizer.

use super::{Command, SkipReason, SyncConfig, SyncOutcome, SyncState, SyncStats};
use crate::error::SyncError;
use crate::health::{Component, HealthRegistry};
use crate::observability::{IngestMetrics, StructuredLogger};
use crate::queue::DurableQueue;
use crate::store::{LocalStore, StoredPoint};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Shortest retry delay, so a zero setting cannot spin
const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Delay after the one that just elapsed: doubled, capped at `max`
pub(super) fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.checked_mul(2).unwrap_or(max).min(max)
}

/// `now + delay`, or roughly thirty years out when that overflows
fn retry_deadline(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(Duration::from_secs(86400 * 365 * 30)))
        .unwrap_or(now)
}

/// What one committed pass did
struct PassReport {
    committed: usize,
    inserted: usize,
    removal_failures: usize,
}

/// Owning task for sync passes. Create with
/// [`super::LocalSynchronizer::builder`] and drive with [`SyncWorker::run`].
pub struct SyncWorker {
    queue: DurableQueue,
    store: Arc<dyn LocalStore>,
    config: SyncConfig,
    trigger: Arc<Notify>,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<SyncState>,
    stats: Arc<RwLock<SyncStats>>,
    metrics: IngestMetrics,
    health: Option<HealthRegistry>,
    logger: StructuredLogger,
    current_backoff: Duration,
    retry_at: Option<Instant>,
}

impl SyncWorker {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        queue: DurableQueue,
        store: Arc<dyn LocalStore>,
        config: SyncConfig,
        trigger: Arc<Notify>,
        commands: mpsc::Receiver<Command>,
        state: watch::Sender<SyncState>,
        stats: Arc<RwLock<SyncStats>>,
        metrics: IngestMetrics,
        health: Option<HealthRegistry>,
        logger: StructuredLogger,
    ) -> Self {
        let mut config = config;
        config.initial_backoff = config.initial_backoff.max(MIN_BACKOFF);
        config.max_backoff = config.max_backoff.max(config.initial_backoff);

        let current_backoff = config.initial_backoff;
        Self {
            queue,
            store,
            config,
            trigger,
            commands,
            state,
            stats,
            metrics,
            health,
            logger,
            current_backoff,
            retry_at: None,
        }
    }

    /// Run until shutdown is requested or every handle is dropped
    pub async fn run(mut self) {
        info!(queue = %self.queue.path().display(), "Starting sync worker");

        loop {
            // Evaluated even when the branch is disabled, so never unwrap here
            let deadline = self.retry_at.unwrap_or_else(Instant::now);

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::SyncNow(reply)) => {
                        let outcome = self.run_pass().await;
                        // The caller may have stopped waiting
                        let _ = reply.send(outcome);
                    }
                    Some(Command::Shutdown) | None => break,
                },

                _ = self.trigger.notified() => {
                    self.run_pass().await;
                }

                _ = tokio::time::sleep_until(deadline), if self.retry_at.is_some() => {
                    debug!("Retrying sync pass after backoff");
                    self.retry_at = None;
                    self.run_pass().await;
                }
            }
        }

        self.state.send_replace(SyncState::Idle);
        if let Some(health) = &self.health {
            health
                .set_unhealthy(Component::Synchronizer, "Sync worker stopped")
                .await;
        }
        info!("Sync worker stopped");
    }

    /// One pass: snapshot, commit in one transaction, then remove the batch
    async fn run_pass(&mut self) -> SyncOutcome {
        if self.queue.is_empty() {
            self.retry_at = None;
            return SyncOutcome::Skipped(SkipReason::Empty);
        }

        self.state.send_replace(SyncState::Syncing);
        let started = Instant::now();
        let result = self.commit_pending().await;
        self.state.send_replace(SyncState::Idle);
        let elapsed = started.elapsed();

        match result {
            Ok(None) => {
                self.retry_at = None;
                SyncOutcome::Skipped(SkipReason::Empty)
            }
            Ok(Some(report)) => {
                self.on_committed(&report, elapsed).await;
                SyncOutcome::Committed {
                    committed: report.committed,
                    inserted: report.inserted,
                    removal_failures: report.removal_failures,
                }
            }
            Err(e) => {
                let kind = e.kind();
                self.on_failure(e).await;
                SyncOutcome::Failed(kind)
            }
        }
    }

    async fn commit_pending(&self) -> Result<Option<PassReport>, SyncError> {
        let entries = self.queue.snapshot().await?;
        if entries.is_empty() {
            return Ok(None);
        }

        let batch: Vec<StoredPoint> = entries
            .iter()
            .map(StoredPoint::from_entry)
            .collect();

        let handle = self.store.open().await?;
        let inserted = handle.insert_batch(&batch).await?;
        drop(handle);

        // Committed: a failed removal leaves the batch for a deduplicated replay
        let removal_failures = match self.queue.remove_all(&entries).await {
            Ok(_) => 0,
            Err(e) => {
                warn!(entries = entries.len(), error = %e, "Failed to remove committed entries from queue");
                entries.len()
            }
        };

        Ok(Some(PassReport {
            committed: entries.len(),
            inserted,
            removal_failures,
        }))
    }

    async fn on_committed(&mut self, report: &PassReport, elapsed: Duration) {
        self.current_backoff = self.config.initial_backoff;
        self.retry_at = None;

        {
            let mut stats = self.stats.write().await;
            stats.passes += 1;
            stats.committed += report.committed as u64;
            stats.removal_failures += report.removal_failures as u64;
            stats.consecutive_failures = 0;
            stats.last_pass_at = Some(Utc::now());
        }

        self.metrics.inc_sync_passes();
        self.metrics.add_committed(report.committed);
        self.metrics.add_removal_failures(report.removal_failures);
        self.metrics.observe_sync_pass(elapsed);
        self.metrics.set_queue_depth(self.queue.len());

        if let Some(health) = &self.health {
            health.set_healthy(Component::Queue).await;
            health.set_healthy(Component::LocalStore).await;
        }

        self.logger.log_sync_pass(
            report.committed,
            report.inserted,
            report.removal_failures,
            elapsed,
        );
    }

    async fn on_failure(&mut self, error: SyncError) {
        let delay = self.current_backoff;
        self.retry_at = Some(retry_deadline(Instant::now(), delay));
        self.current_backoff = next_backoff(self.current_backoff, self.config.max_backoff);

        let message = error.to_string();
        {
            let mut stats = self.stats.write().await;
            stats.failures += 1;
            stats.consecutive_failures += 1;
            stats.last_error = Some(message.clone());
        }
        self.metrics.inc_sync_failures();

        if let Some(health) = &self.health {
            match &error {
                SyncError::Queue(_) => health.set_degraded(Component::Queue, &message).await,
                SyncError::Store(_) => health.set_degraded(Component::LocalStore, &message).await,
                SyncError::Stopped => {}
            }
        }

        self.logger.log_sync_failure(error.kind(), &message, delay);
    }
}
