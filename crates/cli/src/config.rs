//! Configuration management for the CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_API_URL: &str = "http://localhost:8000";

/// CLI configuration, read from `~/.config/ingestctl/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Base URL of the remote data point service
    pub api_url: Option<String>,
    /// Directory of the durable queue
    pub queue_dir: Option<PathBuf>,
    /// Local SQLite database file
    pub database_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default location, if present
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    /// Get the configuration file path
    fn config_path() -> Result<PathBuf> {
        let home = dirs_next::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("ingestctl").join("config.json"))
    }

    /// Flag or env value first, then the file, then the built-in default
    pub fn api_url(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    pub fn queue_dir(&self, flag: Option<PathBuf>) -> Result<PathBuf> {
        match flag.or_else(|| self.queue_dir.clone()) {
            Some(dir) => Ok(dir),
            None => Ok(data_dir()?.join("queue")),
        }
    }

    pub fn database_path(&self, flag: Option<PathBuf>) -> Result<PathBuf> {
        match flag.or_else(|| self.database_path.clone()) {
            Some(path) => Ok(path),
            None => Ok(data_dir()?.join("datapoints.sqlite")),
        }
    }
}

/// Default home of the local queue and database
fn data_dir() -> Result<PathBuf> {
    let base = dirs_next::data_local_dir().context("Could not determine data directory")?;
    Ok(base.join("ingestctl"))
}
