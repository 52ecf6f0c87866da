//! SQLite local store.
//!
//! Uses WAL mode. The schema version lives in `PRAGMA user_version`.

use super::{LocalStore, StoreConfig, StoreHandle, StoredPoint};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Opens SQLite handles for the configured database file
#[derive(Debug, Clone)]
pub struct SqliteStore {
    config: StoreConfig,
}

impl SqliteStore {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Open the database directly as its concrete handle type
    pub async fn open_handle(&self) -> Result<SqliteHandle, StoreError> {
        if self.config.encryption_key.is_some() {
            return Err(StoreError::Unsupported(
                "encryption keys are not supported by the SQLite store".to_string(),
            ));
        }

        if let Some(parent) = self.config.path.parent() {
            prepare_directory(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        // One connection: the handle is owned by a single sync pass
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let handle = SqliteHandle { pool };
        handle.migrate(self.config.schema_version).await?;

        debug!(path = %self.config.path.display(), "Opened local store");
        Ok(handle)
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn open(&self) -> Result<Box<dyn StoreHandle>, StoreError> {
        Ok(Box::new(self.open_handle().await?))
    }
}

/// Open SQLite database
#[derive(Debug, Clone)]
pub struct SqliteHandle {
    pool: SqlitePool,
}

impl SqliteHandle {
    async fn migrate(&self, expected: i64) -> Result<(), StoreError> {
        let found: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;

        if found > expected {
            return Err(StoreError::SchemaMismatch { found, expected });
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS data_points (
                dedup_key TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                committed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        if found < expected {
            // PRAGMA does not accept bound parameters
            sqlx::query(&format!("PRAGMA user_version = {}", expected))
                .execute(&self.pool)
                .await?;
            info!(from = found, to = expected, "Migrated local store schema");
        }

        Ok(())
    }

    pub async fn schema_version(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl StoreHandle for SqliteHandle {
    async fn insert_batch(&self, points: &[StoredPoint]) -> Result<usize, StoreError> {
        let committed_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;

        for point in points {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO data_points (dedup_key, body, committed_at) VALUES (?1, ?2, ?3)",
            )
            .bind(&point.dedup_key)
            .bind(&point.body)
            .bind(&committed_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                debug!(dedup_key = %point.dedup_key, "Skipping already committed data point");
            }
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM data_points")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn fetch_all(&self) -> Result<Vec<StoredPoint>, StoreError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT dedup_key, body FROM data_points ORDER BY rowid")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(dedup_key, body)| StoredPoint { dedup_key, body })
            .collect())
    }
}

fn prepare_directory(directory: &Path) -> std::io::Result<()> {
    if directory.as_os_str().is_empty() {
        return Ok(());
    }
    if directory.is_file() {
        warn!(path = %directory.display(), "Removing file in place of database directory");
        fs::remove_file(directory)?;
    }
    fs::create_dir_all(directory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DataPoint;
    use serde_json::json;
    use tempfile::TempDir;

    fn stored(key: &str, v: serde_json::Value) -> StoredPoint {
        StoredPoint::new(key, &DataPoint::from_value(v).unwrap())
    }

    fn store(dir: &TempDir) -> SqliteStore {
        SqliteStore::new(StoreConfig::new(dir.path().join("db").join("points.sqlite")))
    }

    #[tokio::test]
    async fn test_insert_and_fetch() {
        let dir = TempDir::new().unwrap();
        let handle = store(&dir).open_handle().await.unwrap();

        let inserted = handle
            .insert_batch(&[stored("a", json!({"a": 1})), stored("b", json!({"b": 2}))])
            .await
            .unwrap();

        assert_eq!(inserted, 2);
        assert_eq!(handle.count().await.unwrap(), 2);
        let all = handle.fetch_all().await.unwrap();
        assert_eq!(all[0].body, r#"{"a":1}"#);
        assert_eq!(all[1].body, r#"{"b":2}"#);
    }

    #[tokio::test]
    async fn test_duplicates_are_ignored() {
        let dir = TempDir::new().unwrap();
        let handle = store(&dir).open_handle().await.unwrap();
        let point = stored("same", json!({"header": {"id": "same"}, "body": {}}));

        assert_eq!(handle.insert_batch(&[point.clone()]).await.unwrap(), 1);
        assert_eq!(handle.insert_batch(&[point.clone(), point]).await.unwrap(), 0);
        assert_eq!(handle.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let handle = store(&dir).open_handle().await.unwrap();
            handle.insert_batch(&[stored("a", json!({"a": 1}))]).await.unwrap();
            handle.close().await;
        }

        let handle = store(&dir).open_handle().await.unwrap();
        assert_eq!(handle.count().await.unwrap(), 1);
        assert_eq!(handle.schema_version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_newer_schema_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db").join("points.sqlite");
        {
            let handle = SqliteStore::new(StoreConfig::new(&path).schema_version(5))
                .open_handle()
                .await
                .unwrap();
            handle.close().await;
        }

        let err = SqliteStore::new(StoreConfig::new(&path).schema_version(2))
            .open_handle()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::SchemaMismatch {
                found: 5,
                expected: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_encryption_key_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::new(dir.path().join("x.sqlite")).encryption_key(vec![7u8; 64]);

        // Through the trait, as the synchronizer opens it
        let err = match LocalStore::open(&SqliteStore::new(config)).await {
            Ok(_) => panic!("an encryption key must be refused"),
            Err(err) => err,
        };

        assert!(matches!(err, StoreError::Unsupported(_)));
        assert!(!dir.path().join("x.sqlite").exists());
    }

    #[tokio::test]
    async fn test_file_at_directory_path_is_replaced() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("db"), b"not a directory").unwrap();

        let handle = store(&dir).open_handle().await.unwrap();

        assert!(dir.path().join("db").is_dir());
        assert_eq!(handle.count().await.unwrap(), 0);
    }
}
