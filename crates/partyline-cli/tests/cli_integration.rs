//! CLI Integration Tests
//!
//! These tests verify the CLI commands work correctly end-to-end.
//! They test the "wiring" between the CLI and the core library.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// Create a CLI command with a temporary data directory
fn cli_cmd(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("partyline").expect("Failed to find partyline binary");
    cmd.arg("--data-dir").arg(data_dir.path());
    cmd
}

/// Write a config file into the data directory and return its path
fn write_config(data_dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = data_dir.path().join("partyline.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

/// Session code from the demo's "Session code: <code>" line
fn extract_code(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("Session code: "))
        .map(|code| code.trim().to_string())
}

// ============================================================================
// Code Command Tests
// ============================================================================

#[test]
fn test_code_lengths_follow_app() {
    let data_dir = TempDir::new().unwrap();

    let output = cli_cmd(&data_dir)
        .args(["code", "--app", "quiz", "--count", "3"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let codes: Vec<_> = stdout.lines().collect();
    assert_eq!(codes.len(), 3);
    assert!(codes.iter().all(|c| c.len() == 6));

    let output = cli_cmd(&data_dir)
        .args(["code", "--app", "group-order"])
        .output()
        .unwrap();
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout.trim().len(), 8);
}

#[test]
fn test_code_seed_is_reproducible() {
    let data_dir = TempDir::new().unwrap();
    let run = || {
        cli_cmd(&data_dir)
            .args(["code", "--app", "bingo", "--count", "2", "--seed", "42"])
            .output()
            .unwrap()
            .stdout
    };
    assert_eq!(run(), run());
}

#[test]
fn test_code_rejects_unknown_app() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["code", "--app", "charades"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown app type"));
}

// ============================================================================
// Config Command Tests
// ============================================================================

#[test]
fn test_config_prints_defaults() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("notice_capacity = 16"))
        .stdout(predicate::str::contains("[retry]"))
        .stdout(predicate::str::contains("base_delay_ms = 2000"))
        .stdout(predicate::str::contains("max_retries = 3"));
}

#[test]
fn test_config_file_overrides() {
    let data_dir = TempDir::new().unwrap();
    let config = write_config(&data_dir, "[retry]\nmax_retries = 5\n");

    cli_cmd(&data_dir)
        .arg("--config")
        .arg(&config)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("max_retries = 5"))
        .stdout(predicate::str::contains("base_delay_ms = 2000"));
}

#[test]
fn test_invalid_config_fails() {
    let data_dir = TempDir::new().unwrap();
    let config = write_config(&data_dir, "notice_capacity = 0\n");

    cli_cmd(&data_dir)
        .arg("--config")
        .arg(&config)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("notice_capacity"));
}

// ============================================================================
// Local Store Command Tests
// ============================================================================

#[test]
fn test_local_list_empty() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["local", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No local sessions"));
}

#[test]
fn test_local_show_unknown_code() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["local", "show", "ABCDEF", "--app", "quiz"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No local session ABCDEF"));
}

// ============================================================================
// Demo Command Tests
// ============================================================================

#[test]
fn test_demo_host_sees_participants() {
    let data_dir = TempDir::new().unwrap();

    let output = cli_cmd(&data_dir)
        .args(["demo", "--participants", "2"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let code = extract_code(&stdout).expect("demo prints a session code");
    assert_eq!(code.len(), 6);
    assert!(stdout.contains("Host sees 2 participants"));
    assert!(stdout.contains("1. Player 1"));
    assert!(stdout.contains("2. Player 2"));
    assert!(stdout.contains(&format!("Closed session {}", code)));

    // Cloud sessions never touch the local store
    cli_cmd(&data_dir)
        .args(["local", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No local sessions"));
}

#[test]
fn test_demo_flaky_recovers() {
    let data_dir = TempDir::new().unwrap();
    let config = write_config(&data_dir, "[retry]\nbase_delay_ms = 10\n");

    cli_cmd(&data_dir)
        .arg("--config")
        .arg(&config)
        .args(["demo", "--participants", "1", "--flaky"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dropped 1 change channel(s)"))
        .stdout(predicate::str::contains("Host sees 2 participants"))
        .stdout(predicate::str::contains("Late arrival"))
        .stdout(predicate::str::contains("Subscription: Subscribed"));
}
