//! Crash-safe queue of data points waiting for a local commit
//!
//! Every operation runs on one serialized lane: a mutex around the on-disk
//! log, entered from `spawn_blocking` so callers suspend instead of blocking
//! the runtime. `add` returns only after the record is fsynced. An open queue
//! holds an exclusive lock on its directory until the last clone is dropped.

mod log;

use crate::error::QueueError;
use crate::models::{DataPoint, DataPointConvertible};
use log::QueueLog;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Identity of a queued entry, used only for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A data point plus the identity needed to remove it later
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub id: EntryId,
    /// Random key assigned at enqueue; survives restarts and replays
    pub key: String,
    pub point: DataPoint,
}

impl QueueEntry {
    /// Key the store deduplicates on: the point's `header.id` when it has
    /// one, otherwise the key assigned at enqueue.
    ///
    /// Two separate adds of identical content get different keys.
    pub fn dedup_key(&self) -> &str {
        self.point.id().unwrap_or(&self.key)
    }
}

/// Configuration for the durable queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Directory holding the log; a regular file at this path is replaced
    pub directory: PathBuf,
    pub file_name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./data/queue"),
            file_name: "pending.jsonl".to_string(),
        }
    }
}

impl QueueConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Default::default()
        }
    }

    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }
}

struct QueueInner {
    log: Mutex<QueueLog>,
    len: AtomicUsize,
    path: PathBuf,
}

/// Durable pending-entry buffer. Clones share the same log.
#[derive(Clone)]
pub struct DurableQueue {
    inner: Arc<QueueInner>,
}

impl fmt::Debug for DurableQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableQueue")
            .field("path", &self.inner.path)
            .field("len", &self.len())
            .finish()
    }
}

impl DurableQueue {
    /// Open (or create) the queue, recovering entries left by a previous run
    pub async fn open(config: QueueConfig) -> Result<Self, QueueError> {
        tokio::task::spawn_blocking(move || Self::open_blocking(&config))
            .await
            .map_err(join_error)?
    }

    /// Blocking variant of [`DurableQueue::open`]
    pub fn open_blocking(config: &QueueConfig) -> Result<Self, QueueError> {
        let (log, recovered) = QueueLog::open(&config.directory, &config.file_name)?;
        let path = log.path().to_path_buf();

        if recovered > 0 {
            debug!(
                path = %path.display(),
                entries = recovered,
                next_seq = log.next_seq(),
                "Recovered pending queue entries"
            );
        }

        Ok(Self {
            inner: Arc::new(QueueInner {
                log: Mutex::new(log),
                len: AtomicUsize::new(recovered),
                path,
            }),
        })
    }

    /// Path of the on-disk log
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Run `op` on the serialized lane
    async fn with_log<T, F>(&self, op: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(&mut QueueLog, &AtomicUsize) -> Result<T, QueueError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut log = inner.log.lock().unwrap_or_else(|p| p.into_inner());
            op(&mut log, &inner.len)
        })
        .await
        .map_err(join_error)?
    }

    /// Append a point. Returns after the record is on disk.
    pub async fn add(&self, point: DataPoint) -> Result<QueueEntry, QueueError> {
        let entry = self
            .with_log(move |log, len| {
                let entry = log.append(point)?;
                len.fetch_add(1, Ordering::SeqCst);
                Ok(entry)
            })
            .await?;

        debug!(seq = %entry.id, "Enqueued data point");
        Ok(entry)
    }

    /// Validate a raw JSON value and append it
    pub async fn add_value(&self, value: Value) -> Result<QueueEntry, QueueError> {
        let point = DataPoint::from_value(value)?;
        self.add(point).await
    }

    /// Convert and append
    pub async fn add_convertible<C>(&self, item: &C) -> Result<QueueEntry, QueueError>
    where
        C: DataPointConvertible + ?Sized,
    {
        self.add(item.to_data_point()).await
    }

    /// All pending entries at call time, in append order
    pub async fn snapshot(&self) -> Result<Vec<QueueEntry>, QueueError> {
        self.with_log(|log, len| {
            let entries = log.read_all()?;
            len.store(entries.len(), Ordering::SeqCst);
            Ok(entries)
        })
        .await
    }

    /// Remove one entry. Unknown or already-removed entries are a no-op.
    ///
    /// Returns whether anything was removed.
    pub async fn remove(&self, entry: &QueueEntry) -> Result<bool, QueueError> {
        self.remove_id(entry.id).await
    }

    pub async fn remove_id(&self, id: EntryId) -> Result<bool, QueueError> {
        Ok(self.remove_ids(vec![id]).await? > 0)
    }

    /// Remove a batch of entries with a single rewrite of the log.
    ///
    /// Returns how many were present and removed.
    pub async fn remove_all(&self, entries: &[QueueEntry]) -> Result<usize, QueueError> {
        let ids: HashSet<EntryId> = entries.iter().map(|e| e.id).collect();
        self.remove_ids(ids.into_iter().collect()).await
    }

    async fn remove_ids(&self, ids: Vec<EntryId>) -> Result<usize, QueueError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.with_log(move |log, len| {
            let removed = log.remove_many(&ids)?;
            if removed > 0 {
                // Never underflow if the count drifted from the file
                let _ = len.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    Some(n.saturating_sub(removed))
                });
            }
            Ok(removed)
        })
        .await
    }

    /// Number of pending entries, without touching the disk
    pub fn len(&self) -> usize {
        self.inner.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn join_error(err: tokio::task::JoinError) -> QueueError {
    QueueError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("queue task failed: {}", err),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> DurableQueue {
        DurableQueue::open(QueueConfig::new(dir.path().join("queue")))
            .await
            .unwrap()
    }

    fn point(v: Value) -> DataPoint {
        DataPoint::from_value(v).unwrap()
    }

    #[tokio::test]
    async fn test_add_then_snapshot_contains_point_once() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir).await;
        assert!(queue.is_empty());

        let entry = queue.add(point(json!({"k": "v"}))).await.unwrap();
        let snapshot = queue.snapshot().await.unwrap();

        assert_eq!(snapshot.iter().filter(|e| **e == entry).count(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_does_not_remove() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir).await;
        queue.add(point(json!({"a": 1}))).await.unwrap();
        queue.add(point(json!({"b": 2}))).await.unwrap();

        let first = queue.snapshot().await.unwrap();
        let second = queue.snapshot().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0].point.as_map()["a"], json!(1));
        assert_eq!(first[1].point.as_map()["b"], json!(2));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir).await;
        let keep = queue.add(point(json!({"keep": true}))).await.unwrap();
        let gone = queue.add(point(json!({"keep": false}))).await.unwrap();

        assert!(queue.remove(&gone).await.unwrap());
        assert!(!queue.remove(&gone).await.unwrap());
        assert!(!queue.remove_id(EntryId(999)).await.unwrap());

        assert_eq!(queue.snapshot().await.unwrap(), vec![keep]);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let entry = {
            let queue = open(&dir).await;
            queue.add(point(json!({"survives": "crash"}))).await.unwrap()
        };

        let reopened = open(&dir).await;

        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.snapshot().await.unwrap(), vec![entry]);
    }

    #[tokio::test]
    async fn test_remove_all_drops_only_given_entries() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir).await;
        let mut entries = Vec::new();
        for i in 0..6 {
            entries.push(queue.add(point(json!({"i": i}))).await.unwrap());
        }

        let batch = vec![entries[1].clone(), entries[3].clone(), entries[3].clone()];
        assert_eq!(queue.remove_all(&batch).await.unwrap(), 2);
        assert_eq!(queue.remove_all(&batch).await.unwrap(), 0);
        assert_eq!(queue.remove_all(&[]).await.unwrap(), 0);

        let left: Vec<EntryId> = queue.snapshot().await.unwrap().iter().map(|e| e.id).collect();
        assert_eq!(left, vec![entries[0].id, entries[2].id, entries[4].id, entries[5].id]);
        assert_eq!(queue.len(), 4);
    }

    #[tokio::test]
    async fn test_second_open_of_same_directory_is_locked() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir).await;
        let clone = queue.clone();

        let err = DurableQueue::open(QueueConfig::new(dir.path().join("queue")))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Locked { .. }));
        assert_eq!(err.kind(), ErrorKind::Persistence);

        // Released only once every clone is gone
        drop(queue);
        assert!(DurableQueue::open(QueueConfig::new(dir.path().join("queue")))
            .await
            .is_err());
        drop(clone);
        assert!(open(&dir).await.is_empty());
    }

    #[tokio::test]
    async fn test_identical_content_gets_distinct_dedup_keys() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir).await;

        let a = queue.add(point(json!({"steps": 10}))).await.unwrap();
        let b = queue.add(point(json!({"steps": 10}))).await.unwrap();
        assert_ne!(a.dedup_key(), b.dedup_key());

        let c = queue
            .add(point(json!({"header": {"id": "m-1"}, "body": {}})))
            .await
            .unwrap();
        assert_eq!(c.dedup_key(), "m-1");
    }

    #[tokio::test]
    async fn test_add_value_rejects_non_objects() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir).await;

        let err = queue.add_value(json!([1, 2, 3])).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidDataPoint);
        assert!(queue.is_empty());
        assert!(queue.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_adds_are_serialized() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir).await;

        let mut handles = Vec::new();
        for i in 0..20 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.add(point(json!({"i": i}))).await.unwrap()
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().id);
        }
        ids.sort();
        ids.dedup();

        assert_eq!(ids.len(), 20);
        assert_eq!(queue.snapshot().await.unwrap().len(), 20);
        assert_eq!(queue.len(), 20);
    }

    #[tokio::test]
    async fn test_unwritable_directory_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir).await;
        std::fs::remove_dir_all(dir.path().join("queue")).unwrap();
        // A file where the directory was makes the log path unreachable
        std::fs::write(dir.path().join("queue"), b"blocker").unwrap();

        let err = queue.add(point(json!({"k": "v"}))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
    }
}
