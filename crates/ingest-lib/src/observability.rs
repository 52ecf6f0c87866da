//! Observability infrastructure for the ingestion pipeline
//!
//! Provides:
//! - Prometheus metrics (queue depth, sync pass latency, commit and upload counters)
//! - Structured logging of lifecycle events with tracing

use crate::error::ErrorKind;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for sync pass latency (in seconds)
const SYNC_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<IngestMetricsInner> = OnceLock::new();

struct IngestMetricsInner {
    queue_depth: IntGauge,
    points_enqueued: IntCounter,
    points_committed: IntCounter,
    sync_passes: IntCounter,
    sync_failures: IntCounter,
    removal_failures: IntCounter,
    sync_pass_latency_seconds: Histogram,
    upload_results: IntCounterVec,
}

impl IngestMetricsInner {
    fn new() -> Self {
        Self {
            queue_depth: register_int_gauge!(
                "ingest_queue_depth",
                "Number of data points waiting in the durable queue"
            )
            .expect("Failed to register queue_depth"),

            points_enqueued: register_int_counter!(
                "ingest_points_enqueued_total",
                "Total number of data points durably enqueued"
            )
            .expect("Failed to register points_enqueued"),

            points_committed: register_int_counter!(
                "ingest_points_committed_total",
                "Total number of data points committed to the local store"
            )
            .expect("Failed to register points_committed"),

            sync_passes: register_int_counter!(
                "ingest_sync_passes_total",
                "Total number of sync passes that committed a batch"
            )
            .expect("Failed to register sync_passes"),

            sync_failures: register_int_counter!(
                "ingest_sync_failures_total",
                "Total number of sync passes that failed"
            )
            .expect("Failed to register sync_failures"),

            removal_failures: register_int_counter!(
                "ingest_removal_failures_total",
                "Total number of committed entries that could not be removed from the queue"
            )
            .expect("Failed to register removal_failures"),

            sync_pass_latency_seconds: register_histogram!(
                "ingest_sync_pass_latency_seconds",
                "Time spent in one sync pass",
                SYNC_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sync_pass_latency_seconds"),

            upload_results: register_int_counter_vec!(
                "ingest_upload_results_total",
                "Remote upload results by outcome",
                &["outcome"]
            )
            .expect("Failed to register upload_results"),
        }
    }
}

/// Pipeline metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct IngestMetrics {
    inner: &'static IngestMetricsInner,
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IngestMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestMetrics").finish_non_exhaustive()
    }
}

impl IngestMetrics {
    /// Create a new metrics handle (registers global metrics on first call)
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(IngestMetricsInner::new),
        }
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.inner.queue_depth.set(depth as i64);
    }

    pub fn inc_enqueued(&self) {
        self.inner.points_enqueued.inc();
    }

    pub fn add_committed(&self, count: usize) {
        self.inner.points_committed.inc_by(count as u64);
    }

    pub fn inc_sync_passes(&self) {
        self.inner.sync_passes.inc();
    }

    pub fn inc_sync_failures(&self) {
        self.inner.sync_failures.inc();
    }

    pub fn add_removal_failures(&self, count: usize) {
        self.inner.removal_failures.inc_by(count as u64);
    }

    pub fn observe_sync_pass(&self, elapsed: Duration) {
        self.inner
            .sync_pass_latency_seconds
            .observe(elapsed.as_secs_f64());
    }

    /// Count an upload result, `None` meaning success
    pub fn record_upload(&self, error: Option<ErrorKind>) {
        let label = error.map(|k| k.as_str()).unwrap_or("success");
        self.inner.upload_results.with_label_values(&[label]).inc();
    }
}

/// Render the global registry in the Prometheus text exposition format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Structured logger for pipeline lifecycle events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, pending_entries: usize) {
        info!(
            event = "agent_started",
            instance = %self.instance,
            agent_version = %version,
            pending_entries = pending_entries,
            "Ingest agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Ingest agent shutting down"
        );
    }

    /// Log entries found in the queue when it was opened
    pub fn log_queue_recovered(&self, entries: usize, path: &Path) {
        if entries > 0 {
            info!(
                event = "queue_recovered",
                instance = %self.instance,
                entries = entries,
                path = %path.display(),
                "Recovered pending entries from durable queue"
            );
        }
    }

    /// Log the end of a sync pass
    pub fn log_sync_pass(
        &self,
        committed: usize,
        inserted: usize,
        removal_failures: usize,
        elapsed: Duration,
    ) {
        if removal_failures > 0 {
            warn!(
                event = "sync_pass",
                instance = %self.instance,
                committed = committed,
                inserted = inserted,
                removal_failures = removal_failures,
                elapsed_ms = elapsed.as_millis() as u64,
                "Sync pass committed, some entries remain queued for replay"
            );
        } else {
            info!(
                event = "sync_pass",
                instance = %self.instance,
                committed = committed,
                inserted = inserted,
                elapsed_ms = elapsed.as_millis() as u64,
                "Sync pass committed"
            );
        }
    }

    /// Log a failed sync pass
    pub fn log_sync_failure(&self, kind: ErrorKind, error: &str, retry_in: Duration) {
        warn!(
            event = "sync_pass",
            instance = %self.instance,
            error_kind = %kind,
            error = %error,
            retry_in_ms = retry_in.as_millis() as u64,
            "Sync pass failed, entries left queued"
        );
    }

    /// Log the outcome of a remote upload
    pub fn log_upload_result(&self, point_id: Option<&str>, error: Option<ErrorKind>) {
        match error {
            None => info!(
                event = "upload_result",
                instance = %self.instance,
                point_id = ?point_id,
                outcome = "success",
                "Data point uploaded"
            ),
            Some(kind) => warn!(
                event = "upload_result",
                instance = %self.instance,
                point_id = ?point_id,
                outcome = %kind,
                "Data point upload failed"
            ),
        }
    }
}
