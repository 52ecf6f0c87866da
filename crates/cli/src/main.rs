//! Data point ingestion CLI
//!
//! A command-line tool for signing in to the remote service, uploading and
//! validating data points, and working with the local queue and store.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{local, remote};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Data point ingestion CLI
#[derive(Parser)]
#[command(name = "ingestctl")]
#[command(author, version, about = "CLI for the data point ingestion pipeline", long_about = None)]
pub struct Cli {
    /// Remote service URL (can also be set via INGEST_API_URL env var)
    #[arg(long, env = "INGEST_API_URL")]
    pub api_url: Option<String>,

    /// Local queue directory
    #[arg(long, env = "INGEST_QUEUE_DIR")]
    pub queue_dir: Option<PathBuf>,

    /// Local SQLite database file
    #[arg(long, env = "INGEST_DATABASE_PATH")]
    pub database_path: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in and print an auth token
    SignIn {
        #[arg(long, short)]
        username: String,

        /// Read from stdin when omitted
        #[arg(long, env = "INGEST_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Upload one data point to the remote service
    Post {
        /// Auth token from sign-in
        #[arg(long, env = "INGEST_TOKEN", hide_env_values = true)]
        token: String,

        /// JSON file holding the data point ("-" for stdin)
        file: PathBuf,
    },

    /// Check whether a file holds a valid data point
    Validate {
        /// JSON file ("-" for stdin)
        file: PathBuf,
    },

    /// Durably enqueue a data point and sync it into the local store
    Enqueue {
        /// JSON file holding the data point ("-" for stdin)
        file: PathBuf,
    },

    /// Show local queue depth and committed point count
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = config::Config::load()?;
    let format = cli.format;

    let ok = match cli.command {
        Commands::SignIn { username, password } => {
            let client = remote::client(&config.api_url(cli.api_url))?;
            remote::sign_in(&client, &username, password, format).await?;
            true
        }
        Commands::Post { token, file } => {
            let client = remote::client(&config.api_url(cli.api_url))?;
            remote::post(&client, &token, &file, format).await?
        }
        Commands::Validate { file } => {
            let client = remote::client(&config.api_url(cli.api_url))?;
            remote::validate(&client, &file, format)?
        }
        Commands::Enqueue { file } => {
            let paths = local::LocalPaths {
                queue_dir: config.queue_dir(cli.queue_dir)?,
                database_path: config.database_path(cli.database_path)?,
            };
            local::enqueue(&paths, &file, format).await?;
            true
        }
        Commands::Status => {
            let paths = local::LocalPaths {
                queue_dir: config.queue_dir(cli.queue_dir)?,
                database_path: config.database_path(cli.database_path)?,
            };
            local::status(&paths, format).await?;
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
