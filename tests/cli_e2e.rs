//! End-to-end CLI tests for xlens.
//!
//! These tests run the actual xlens binary against a filesystem store in a
//! temporary directory and verify:
//! - Command-line interface behavior
//! - JSON output shape
//! - Error handling and messages
//!
//! Tests are grouped by command: `test_cli_*` for general flags,
//! `test_list_*`, `test_view_*` for the producer commands, and
//! `test_config_*`.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

/// Log a test event with timestamp
macro_rules! test_log {
    ($($arg:tt)*) => {
        let timestamp = chrono::Utc::now().format("%H:%M:%S%.3f");
        eprintln!("[TEST {}] {}", timestamp, format!($($arg)*));
    };
}

/// `{"9": {"tweets": {"9": {"full_text": "from the tree"}}}}`
fn tree_only_pickle() -> Vec<u8> {
    fn text(out: &mut Vec<u8>, s: &str) {
        out.push(b'X');
        out.extend_from_slice(&u32::try_from(s.len()).unwrap().to_le_bytes());
        out.extend_from_slice(s.as_bytes());
    }
    let mut out = vec![0x80, 2, b'}', b'('];
    text(&mut out, "9");
    out.extend_from_slice(b"}(");
    text(&mut out, "tweets");
    out.extend_from_slice(b"}(");
    text(&mut out, "9");
    out.extend_from_slice(b"}(");
    text(&mut out, "full_text");
    text(&mut out, "from the tree");
    out.extend_from_slice(b"uuuu.");
    out
}

/// A store with one account that has no tweet table: companions, a tree
/// file and a 3x2 embedding matrix.
fn create_store() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let account = dir.path().join("alice");
    fs::create_dir_all(&account).expect("Failed to create account directory");
    fs::create_dir_all(dir.path().join(".cache")).expect("Failed to create hidden directory");

    fs::write(account.join("clustering_params.json"), r#"{"n_clusters": 3}"#).unwrap();
    fs::write(
        account.join("group_results.json"),
        r#"{"overall_summary": "Mostly  compilers."}"#,
    )
    .unwrap();
    fs::write(account.join("local_tweet_id_maps.json"), r#"{"a": {"0": "1", "1": "2"}}"#).unwrap();
    fs::write(account.join("trees.pkl"), tree_only_pickle()).unwrap();
    let matrix = xlens::npy::encode(&[1.0_f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2], false).unwrap();
    fs::write(account.join("embeddings.npy"), matrix).unwrap();
    dir
}

/// Get the xlens command with an isolated environment.
fn xlens_cmd(root: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("xlens");
    cmd.env_remove("XLENS_ROOT")
        .env_remove("XLENS_BASE_URL")
        .env_remove("XLENS_BACKEND")
        .env_remove("RUST_LOG")
        .env("HOME", root)
        .env("XDG_CONFIG_HOME", root.join(".config"))
        .arg("--no-color")
        .arg("--root")
        .arg(root);
    cmd
}

fn stdout_json(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.output().expect("Failed to run command");
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}

// =============================================================================
// General
// =============================================================================

#[test]
fn test_cli_help() {
    test_log!("Starting test_cli_help");
    let start = Instant::now();

    cargo_bin_cmd!("xlens")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("xlens"))
        .stdout(predicate::str::contains("Usage"));

    test_log!("test_cli_help completed in {:?}", start.elapsed());
}

#[test]
fn test_cli_version() {
    cargo_bin_cmd!("xlens")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("xlens"));
}

#[test]
fn test_cli_no_args() {
    let output = cargo_bin_cmd!("xlens").output().expect("Failed to run command");
    assert!(!output.status.success());
    assert!(!output.stderr.is_empty());
}

// =============================================================================
// List
// =============================================================================

#[test]
fn test_list_skips_hidden_directories() {
    test_log!("Starting test_list_skips_hidden_directories");
    let store = create_store();

    xlens_cmd(store.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("alice"))
        .stdout(predicate::str::contains(".cache").not());
}

#[test]
fn test_list_empty_store() {
    let dir = TempDir::new().unwrap();
    xlens_cmd(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("No accounts found"));
}

// =============================================================================
// Views
// =============================================================================

#[test]
fn test_view_summary_without_tweet_table() {
    test_log!("Starting test_view_summary_without_tweet_table");
    let start = Instant::now();
    let store = create_store();

    let summary = stdout_json(xlens_cmd(store.path()).args(["summary", "alice"]));
    assert_eq!(summary["clusters"], 3);
    assert_eq!(summary["tweets"], 2);
    assert_eq!(summary["description"], "Mostly compilers.");
    assert_eq!(summary["avatarUrl"], "/placeholder.jpg");

    test_log!("summary completed in {:?}", start.elapsed());
}

#[test]
fn test_view_bundle_nulls_missing_views() {
    let store = create_store();
    let bundle = stdout_json(xlens_cmd(store.path()).args(["bundle", "alice"]));

    assert!(bundle["clusters"].is_null());
    assert!(bundle["summary"].is_object());
    assert_eq!(bundle["embeddings"]["originalDimensions"], 2);
    assert_eq!(bundle["embeddings"]["embeddings"].as_array().unwrap().len(), 0);

    let threads = bundle["threads"]["threads"].as_array().unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0]["tweets"][0]["fullText"], "from the tree");
}

#[test]
fn test_view_compact_output_is_one_line() {
    let store = create_store();
    let output = xlens_cmd(store.path())
        .args(["--compact", "summary", "alice"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    assert_eq!(text.trim_end().lines().count(), 1);
}

#[test]
fn test_view_missing_view_prints_null() {
    let store = create_store();
    xlens_cmd(store.path())
        .args(["clusters", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::diff("null\n"));
}

#[test]
fn test_view_unknown_account_suggests_nearest() {
    let store = create_store();
    xlens_cmd(store.path())
        .args(["bundle", "alcie"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Account not found"))
        .stderr(predicate::str::contains("Did you mean 'alice'?"));
}

#[test]
fn test_view_corrupt_matrix_fails_that_view() {
    let store = create_store();
    fs::write(store.path().join("alice/embeddings.npy"), b"garbage").unwrap();

    xlens_cmd(store.path())
        .args(["embeddings", "alice"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Corrupt artifact"));

    // The bundle still succeeds and reports the failed slot.
    let bundle = stdout_json(xlens_cmd(store.path()).args(["bundle", "alice"]));
    assert!(bundle["embeddings"].is_null());
    assert!(bundle["errors"]["embeddings"].is_string());
    assert!(bundle["summary"].is_object());
}

// =============================================================================
// Config
// =============================================================================

#[test]
fn test_config_init_prints_defaults() {
    let dir = TempDir::new().unwrap();
    xlens_cmd(dir.path())
        .args(["config", "--init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[store]"))
        .stdout(predicate::str::contains("clustered_tweets_df.parquet"));
}

#[test]
fn test_config_reflects_cli_root() {
    let dir = TempDir::new().unwrap();
    let config = stdout_json(xlens_cmd(dir.path()).args(["config", "--format", "json"]));
    assert_eq!(config["store"]["backend"], "fs");
    assert_eq!(config["store"]["root"], dir.path().to_str().unwrap());
}

#[test]
fn test_config_bad_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[store\n").unwrap();
    xlens_cmd(dir.path())
        .arg("--config")
        .arg(&path)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}
