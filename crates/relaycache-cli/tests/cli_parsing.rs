//! CLI parsing tests for the relaycache command
//!
//! Tests that verify CLI argument parsing works correctly.

use assert_cmd::Command;
use predicates::prelude::*;

/// Get a Command for the relaycache binary
#[allow(deprecated)]
fn relaycache() -> Command {
    Command::cargo_bin("relaycache").expect("Failed to find relaycache binary")
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[test]
fn test_help_shows_all_commands() {
    relaycache()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("partitions"))
        .stdout(predicate::str::contains("get"))
        .stdout(predicate::str::contains("put"))
        .stdout(predicate::str::contains("mark-absent"))
        .stdout(predicate::str::contains("aggregates"))
        .stdout(predicate::str::contains("delete-aggregate"))
        .stdout(predicate::str::contains("compact"))
        .stdout(predicate::str::contains("sweep"))
        .stdout(predicate::str::contains("clear"))
        .stdout(predicate::str::contains("upgrade"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_flag() {
    relaycache()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("relaycache"));
}

// ============================================================================
// Global Options Tests
// ============================================================================

#[test]
fn test_global_options_in_help() {
    relaycache()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--dir"))
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--data-dir"))
        .stdout(predicate::str::contains("--schema-version"))
        .stdout(predicate::str::contains("--no-auto-upgrade"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("--verbose"))
        .stdout(predicate::str::contains("--quiet"));
}

#[test]
fn test_invalid_log_format_rejected() {
    relaycache()
        .args(["--log-format", "xml", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown log format"));
}

#[test]
fn test_schema_version_must_be_a_number() {
    relaycache()
        .args(["--schema-version", "two", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

// ============================================================================
// Command Argument Tests
// ============================================================================

#[test]
fn test_get_help() {
    relaycache()
        .args(["get", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--discriminator"))
        .stdout(predicate::str::contains("--kind"))
        .stdout(predicate::str::contains("--id"))
        .stdout(predicate::str::contains("--json"));
}

#[test]
fn test_get_rejects_unknown_category() {
    relaycache()
        .args(["get", "podcasts", "alice"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown record category"));
}

#[test]
fn test_get_requires_category_or_id() {
    relaycache().arg("get").assert().failure();
}

#[test]
fn test_get_id_requires_kind() {
    relaycache()
        .args(["get", "--id", "abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--kind"));
}

#[test]
fn test_aggregates_discriminator_requires_owner() {
    relaycache()
        .args(["aggregates", "follow-set", "-d", "friends"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--owner"));
}

#[test]
fn test_compact_all_conflicts_with_categories() {
    relaycache()
        .args(["compact", "profile", "--all"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_clear_all_conflicts_with_partition() {
    relaycache()
        .args(["clear", "notes", "--all"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_sweep_rejects_bad_ttl_override() {
    relaycache()
        .args(["sweep", "--ttl", "notes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("PARTITION=TTL"));
}

#[test]
fn test_config_subcommands_in_help() {
    relaycache()
        .args(["config", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("show"))
        .stdout(predicate::str::contains("get"))
        .stdout(predicate::str::contains("set"))
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("path"));
}
