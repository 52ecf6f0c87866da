//! Agent configuration
//!
//! Read from an optional TOML file named by `INGEST_CONFIG`, then from
//! `INGEST_*` environment variables, which take precedence.

use anyhow::{Context, Result};
use ingest_lib::queue::QueueConfig;
use ingest_lib::store::StoreConfig;
use ingest_lib::sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the optional config file
pub const CONFIG_PATH_ENV: &str = "INGEST_CONFIG";

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name attached to lifecycle log events
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Port for the health, metrics and ingest API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory of the durable queue log
    #[serde(default = "default_queue_dir")]
    pub queue_dir: PathBuf,

    /// Directory of the local database
    #[serde(default = "default_database_dir")]
    pub database_dir: PathBuf,

    #[serde(default = "default_database_file")]
    pub database_file: String,

    #[serde(default = "default_schema_version")]
    pub schema_version: i64,

    /// Periodic sync trigger interval in seconds
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "ingest-agent".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_queue_dir() -> PathBuf {
    PathBuf::from("./data/queue")
}

fn default_database_dir() -> PathBuf {
    PathBuf::from("./data/db")
}

fn default_database_file() -> String {
    "datapoints.sqlite".to_string()
}

fn default_schema_version() -> i64 {
    1
}

fn default_sync_interval() -> u64 {
    30
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_secs() -> u64 {
    300
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            api_port: default_api_port(),
            queue_dir: default_queue_dir(),
            database_dir: default_database_dir(),
            database_file: default_database_file(),
            schema_version: default_schema_version(),
            sync_interval_secs: default_sync_interval(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the environment and the optional config file
    pub fn load() -> Result<Self> {
        let file = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::load_from(file.as_deref())
    }

    /// Load with an explicit config file path
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("INGEST").try_parsing(true))
            .build()
            .context("Failed to read agent configuration")?;

        config
            .try_deserialize()
            .context("Invalid agent configuration")
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_dir.join(&self.database_file)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::new(&self.queue_dir)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(self.database_path()).schema_version(self.schema_version)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
            ..Default::default()
        }
    }
}
