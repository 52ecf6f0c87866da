//! In-memory local store with failure injection, for tests and dry runs.

use super::{LocalStore, StoreHandle, StoredPoint};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct Contents {
    points: Vec<StoredPoint>,
    keys: HashSet<String>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    contents: Mutex<Contents>,
    latency: Mutex<Duration>,
    failing_opens: AtomicUsize,
    fail_next_transaction: AtomicBool,
    opens: AtomicUsize,
    open_times: Mutex<Vec<tokio::time::Instant>>,
    transactions: AtomicUsize,
    active_transactions: AtomicUsize,
    max_concurrent_transactions: AtomicUsize,
}

/// Store that keeps points in memory. Clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` fail
    pub fn fail_next_open(&self) {
        self.fail_opens(1);
    }

    /// Make the next `count` opens fail
    pub fn fail_opens(&self, count: usize) {
        self.inner.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Make the next `insert_batch` fail without storing anything
    pub fn fail_next_transaction(&self) {
        self.inner.fail_next_transaction.store(true, Ordering::SeqCst);
    }

    /// Delay every transaction by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.inner.latency) = latency;
    }

    /// Highest number of transactions ever in flight at once
    pub fn max_concurrent_transactions(&self) -> usize {
        self.inner.max_concurrent_transactions.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    /// When each `open` was attempted, on the tokio clock
    pub fn open_times(&self) -> Vec<tokio::time::Instant> {
        lock(&self.inner.open_times).clone()
    }

    /// Transactions attempted, including failed ones
    pub fn transaction_count(&self) -> usize {
        self.inner.transactions.load(Ordering::SeqCst)
    }

    /// Stored points in commit order
    pub fn points(&self) -> Vec<StoredPoint> {
        lock(&self.inner.contents).points.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.contents).points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn open(&self) -> Result<Box<dyn StoreHandle>, StoreError> {
        lock(&self.inner.open_times).push(tokio::time::Instant::now());
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .inner
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "injected open failure",
            )));
        }
        Ok(Box::new(MemoryHandle {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemoryHandle {
    inner: Arc<MemoryInner>,
}

/// Tracks one in-flight transaction
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(active: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreHandle for MemoryHandle {
    async fn insert_batch(&self, points: &[StoredPoint]) -> Result<usize, StoreError> {
        let _active = ActiveGuard::enter(
            &self.inner.active_transactions,
            &self.inner.max_concurrent_transactions,
        );
        self.inner.transactions.fetch_add(1, Ordering::SeqCst);

        let latency = *lock(&self.inner.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.inner.fail_next_transaction.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected transaction failure",
            )));
        }

        let mut contents = lock(&self.inner.contents);
        let mut inserted = 0;
        for point in points {
            if contents.keys.insert(point.dedup_key.clone()) {
                contents.points.push(point.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(lock(&self.inner.contents).points.len() as u64)
    }

    async fn fetch_all(&self) -> Result<Vec<StoredPoint>, StoreError> {
        Ok(lock(&self.inner.contents).points.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(key: &str) -> StoredPoint {
        StoredPoint {
            dedup_key: key.to_string(),
            body: format!(r#"{{"key":"{}"}}"#, key),
        }
    }

    #[tokio::test]
    async fn test_insert_dedups_by_key() {
        let store = MemoryStore::new();
        let handle = store.open().await.unwrap();

        assert_eq!(handle.insert_batch(&[point("a"), point("b")]).await.unwrap(), 2);
        assert_eq!(handle.insert_batch(&[point("b"), point("c")]).await.unwrap(), 1);

        let keys: Vec<_> = store.points().into_iter().map(|p| p.dedup_key).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(handle.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_injected_failures_fire_once() {
        let store = MemoryStore::new();

        store.fail_next_open();
        assert!(store.open().await.is_err());
        let handle = store.open().await.unwrap();

        store.fail_next_transaction();
        assert!(handle.insert_batch(&[point("a")]).await.is_err());
        assert!(store.is_empty());

        assert_eq!(handle.insert_batch(&[point("a")]).await.unwrap(), 1);
        assert_eq!(store.open_count(), 2);
        assert_eq!(store.transaction_count(), 2);
    }

    #[tokio::test]
    async fn test_tracks_concurrent_transactions() {
        let store = MemoryStore::new();
        store.set_latency(Duration::from_millis(20));
        let a = store.open().await.unwrap();
        let b = store.open().await.unwrap();

        let pa = [point("a")];
        let pb = [point("b")];
        let (ra, rb) = tokio::join!(a.insert_batch(&pa), b.insert_batch(&pb));
        ra.unwrap();
        rb.unwrap();

        assert_eq!(store.max_concurrent_transactions(), 2);
    }
}
