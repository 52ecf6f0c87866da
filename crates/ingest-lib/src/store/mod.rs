//! Persistent local store for committed data points
//!
//! The synchronizer only needs `open` and one all-or-nothing batch insert.
//! Inserts are keyed by [`QueueEntry::dedup_key`] so an entry replayed after
//! a failed queue removal is not stored twice.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::models::DataPoint;
use crate::queue::QueueEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A data point in the shape the store persists it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPoint {
    pub dedup_key: String,
    /// Canonical JSON encoding of the point
    pub body: String,
}

impl StoredPoint {
    pub fn new(dedup_key: impl Into<String>, point: &DataPoint) -> Self {
        Self {
            dedup_key: dedup_key.into(),
            body: point.to_json(),
        }
    }

    pub fn from_entry(entry: &QueueEntry) -> Self {
        Self::new(entry.dedup_key(), &entry.point)
    }

    /// Decode the stored body back into a data point
    pub fn to_point(&self) -> Result<DataPoint, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Options for opening a local store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file; its parent directory is created on open
    pub path: PathBuf,
    pub encryption_key: Option<Vec<u8>>,
    /// Schema version this build writes
    pub schema_version: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/db/datapoints.sqlite"),
            encryption_key: None,
            schema_version: 1,
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn encryption_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    pub fn schema_version(mut self, version: i64) -> Self {
        self.schema_version = version;
        self
    }
}

/// A store that can be opened for one sync pass
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Open a handle. Failures are reported, never retried here.
    async fn open(&self) -> Result<Box<dyn StoreHandle>, StoreError>;
}

/// An open store
#[async_trait]
pub trait StoreHandle: Send + Sync {
    /// Insert all points in one transaction.
    ///
    /// Returns how many rows were new; duplicates by `dedup_key` are skipped.
    /// On error nothing from the batch is stored.
    async fn insert_batch(&self, points: &[StoredPoint]) -> Result<usize, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    /// Every stored point in commit order
    async fn fetch_all(&self) -> Result<Vec<StoredPoint>, StoreError>;
}
