//! Commands that talk to the remote data point service

use anyhow::{Context, Result};
use colored::Colorize;
use ingest_lib::{AuthToken, ClientConfig, ErrorKind, RemoteClient};
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::path::Path;

use super::read_json;
use crate::output::{report, validity_label, Mark, OutputFormat};

pub fn client(api_url: &str) -> Result<RemoteClient> {
    let config = ClientConfig::new(api_url)
        .user_agent(format!("ingestctl/{}", env!("CARGO_PKG_VERSION")));
    RemoteClient::new(config).with_context(|| format!("Invalid API URL {}", api_url))
}

/// Sign in and print the token
pub async fn sign_in(
    client: &RemoteClient,
    username: &str,
    password: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => prompt_password()?,
    };

    let token = client
        .sign_in(username, &password)
        .await
        .context("Sign-in failed")?;

    format.render(&json!({ "token": token.as_str() }), || {
        println!("{}", token.as_str())
    });
    Ok(())
}

/// Reads one line from stdin; input is echoed
fn prompt_password() -> Result<String> {
    eprint!("Password: ");
    std::io::stderr().flush().ok();

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Upload one data point file, returning whether it was accepted
pub async fn post(
    client: &RemoteClient,
    token: &str,
    file: &Path,
    format: OutputFormat,
) -> Result<bool> {
    let sample = read_json(file)?;
    let result = client.post_sample(&sample, &AuthToken::new(token)).await;

    let summary = match &result {
        Ok(()) => json!({ "uploaded": true }),
        Err(e) => json!({
            "uploaded": false,
            "kind": e.kind(),
            "retryable": e.is_retryable(),
            "error": e.to_string(),
        }),
    };
    format.render(&summary, || match &result {
        Ok(()) => report(Mark::Done, "Data point uploaded"),
        Err(e) => {
            report(
                Mark::Failed,
                &format!("Upload failed ({}): {}", e.kind().as_str().red(), e),
            );
            if e.is_retryable() {
                eprintln!("  The request can be retried later.");
            } else if e.kind() == ErrorKind::InvalidAuthToken {
                eprintln!("  Sign in again to get a fresh token.");
            }
        }
    });

    Ok(result.is_ok())
}

/// Report whether a file holds a valid data point
pub fn validate(client: &RemoteClient, file: &Path, format: OutputFormat) -> Result<bool> {
    let sample: Value = read_json(file)?;
    let valid = client.validate_sample(&sample);

    format.render(&json!({ "valid": valid }), || {
        println!("{}: {}", file.display(), validity_label(valid))
    });
    Ok(valid)
}
