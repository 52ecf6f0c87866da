//! Durable ingestion pipeline for measurement data points
//!
//! This crate provides the core functionality for:
//! - Validating data points and converting typed measurements
//! - Authenticating against and uploading to the remote service
//! - A crash-safe local queue of pending points
//! - Single-flight synchronization of the queue into a local store
//! - Health checks and observability

pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod queue;
pub mod remote;
pub mod store;
pub mod sync;

pub use error::{ClientError, ErrorKind, QueueError, StoreError, SyncError};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{IngestMetrics, StructuredLogger};
pub use queue::{DurableQueue, EntryId, QueueConfig, QueueEntry};
pub use remote::{ClientConfig, RemoteClient};
pub use store::{LocalStore, MemoryStore, SqliteStore, StoreConfig, StoreHandle, StoredPoint};
pub use sync::{LocalSynchronizer, SyncConfig, SyncOutcome, SyncState, SyncStats};
