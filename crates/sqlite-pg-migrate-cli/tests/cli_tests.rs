//! CLI integration tests for sqlite-pg-migrate.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for error conditions that occur before any database
//! is contacted.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the sqlite-pg-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("sqlite-pg-migrate").unwrap()
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("test"))
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("create-config"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sqlite-pg-migrate"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flags_listed() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--ledger-file"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_short_config_flag() {
    cmd()
        .args(["-c", "some_config.yaml", "--help"])
        .assert()
        .success();
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "test"])
        .assert()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "migrate"])
        .assert()
        .code(1);
}

#[test]
fn test_wrong_source_type_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:").unwrap();
    writeln!(file, "  type: postgres").unwrap();
    writeln!(file, "  host: localhost").unwrap();
    writeln!(file, "  database: app").unwrap();
    writeln!(file, "  user: app").unwrap();
    writeln!(file, "target:").unwrap();
    writeln!(file, "  type: postgres").unwrap();
    writeln!(file, "  host: localhost").unwrap();
    writeln!(file, "  database: app").unwrap();
    writeln!(file, "  user: app").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "validate"])
        .assert()
        .code(1);
}

#[test]
fn test_missing_source_file_exits_with_connection_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.yaml");
    std::fs::write(
        &config,
        format!(
            "source:\n  type: sqlite\n  path: {}\ntarget:\n  type: postgres\n  host: localhost\n  database: app\n  user: app\n",
            dir.path().join("absent.db").display()
        ),
    )
    .unwrap();

    cmd()
        .args(["--config", config.to_str().unwrap(), "test"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("does not exist"));
}

// =============================================================================
// create-config
// =============================================================================

#[test]
fn test_create_config_writes_loadable_template() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("generated.yaml");

    cmd()
        .args(["create-config", "--output", out.to_str().unwrap()])
        .assert()
        .success();

    let content = std::fs::read_to_string(&out).unwrap();
    assert!(content.contains("type: sqlite"));
    assert!(content.contains("existing_tables: fail"));
}

#[test]
fn test_create_config_refuses_overwrite_without_force() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("config.yaml");
    std::fs::write(&out, "keep me").unwrap();

    cmd()
        .args(["create-config", "--output", out.to_str().unwrap()])
        .assert()
        .code(1);
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "keep me");

    cmd()
        .args(["create-config", "--output", out.to_str().unwrap(), "--force"])
        .assert()
        .success();
    assert_ne!(std::fs::read_to_string(&out).unwrap(), "keep me");
}

// =============================================================================
// No Subcommand Tests
// =============================================================================

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
