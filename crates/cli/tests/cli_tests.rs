//! CLI integration tests

use std::process::Command;

fn run(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "-q", "-p", "ingest-cli", "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = run(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("data point ingestion"),
        "Should show app description"
    );
    assert!(stdout.contains("sign-in"), "Should show sign-in command");
    assert!(stdout.contains("post"), "Should show post command");
    assert!(stdout.contains("validate"), "Should show validate command");
    assert!(stdout.contains("enqueue"), "Should show enqueue command");
    assert!(stdout.contains("status"), "Should show status command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = run(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("ingestctl"), "Should show binary name");
}

#[test]
fn test_post_help() {
    let output = run(&["post", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Post help should succeed");
    assert!(stdout.contains("--token"), "Should show token option");
    assert!(stdout.contains("<FILE>"), "Should show file argument");
}

#[test]
fn test_sign_in_requires_username() {
    let output = run(&["sign-in"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "Sign-in without username should fail");
    assert!(stderr.contains("--username"), "Should name the missing option");
}

#[test]
fn test_validate_reports_valid_and_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.json");
    let bad = dir.path().join("bad.json");
    std::fs::write(&good, r#"{"header": {"id": "m-1"}, "body": {}}"#).unwrap();
    std::fs::write(&bad, "[1, 2, 3]").unwrap();

    let output = run(&["--format", "json", "validate", good.to_str().unwrap()]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("\"valid\": true"));

    let output = run(&["--format", "json", "validate", bad.to_str().unwrap()]);
    assert!(!output.status.success(), "Invalid point should exit non-zero");
    assert!(String::from_utf8_lossy(&output.stdout).contains("\"valid\": false"));
}

#[test]
fn test_enqueue_then_status() {
    let dir = tempfile::tempdir().unwrap();
    let point = dir.path().join("point.json");
    std::fs::write(&point, r#"{"header": {"id": "m-7"}, "body": {"bpm": 61}}"#).unwrap();
    let queue_dir = dir.path().join("queue");
    let database = dir.path().join("db").join("points.sqlite");

    let local = [
        "--queue-dir",
        queue_dir.to_str().unwrap(),
        "--database-path",
        database.to_str().unwrap(),
        "--format",
        "json",
    ];

    let output = run(&[&local[..], &["enqueue", point.to_str().unwrap()]].concat());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "Enqueue should succeed");
    assert!(stdout.contains("\"committed\""));

    let output = run(&[&local[..], &["status"]].concat());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["pending"], 0);
    assert_eq!(status["committed"], 1);
}
