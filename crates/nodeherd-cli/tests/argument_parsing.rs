//! Focused CLI argument parsing tests.
//!
//! Tests that verify command-line argument parsing works correctly without
//! deploying a cluster.

#![allow(deprecated)] // Command::cargo_bin is deprecated but replacement requires newer assert_cmd

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn nodeherd() -> Command {
    let mut cmd = Command::cargo_bin("nodeherd").unwrap();
    cmd.env("NO_COLOR", "1");
    cmd
}

// ============================================================================
// Commands That Need No Cluster
// ============================================================================

#[test]
fn version_command_succeeds() {
    nodeherd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("nodeherd"));
}

#[test]
fn version_flag_shows_version() {
    nodeherd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("nodeherd"));
}

#[test]
fn help_flag_shows_subcommands() {
    nodeherd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("stop"))
        .stdout(predicate::str::contains("scenarios"));
}

#[test]
fn scenarios_lists_builtins() {
    nodeherd()
        .arg("scenarios")
        .assert()
        .success()
        .stdout(predicate::str::contains("recreate-mnode"))
        .stdout(predicate::str::contains("smoke-restart"));
}

#[test]
fn config_shows_defaults() {
    let temp = TempDir::new().unwrap();
    nodeherd()
        .args(["config", "--project", temp.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("taosd"))
        .stdout(predicate::str::contains("6030"));
}

#[test]
fn config_json_format() {
    let temp = TempDir::new().unwrap();
    nodeherd()
        .args(["config", "-f", "json", "--project", temp.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"base_port\": 6030"));
}

#[test]
fn config_rejects_unknown_format() {
    let temp = TempDir::new().unwrap();
    nodeherd()
        .args(["config", "-f", "yaml", "--project", temp.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown format"));
}

// ============================================================================
// Argument Parsing Errors
// ============================================================================

#[test]
fn no_command_shows_help() {
    nodeherd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn run_help_lists_harness_flags() {
    nodeherd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dnode-nums"))
        .stdout(predicate::str::contains("--mnode-nums"))
        .stdout(predicate::str::contains("--update-cfg-dict"))
        .stdout(predicate::str::contains("--query-policy"));
}

#[test]
fn run_rejects_non_numeric_dnode_count() {
    nodeherd()
        .args(["run", "-N", "five"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn run_rejects_query_policy_out_of_range() {
    nodeherd()
        .args(["run", "-Q", "9"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("9"));
}

#[test]
fn run_rejects_unknown_backend() {
    nodeherd()
        .args(["run", "--backend", "grpc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

// ============================================================================
// Validation Before Deploy
// ============================================================================

#[test]
fn run_rejects_more_mnodes_than_dnodes() {
    let temp = TempDir::new().unwrap();
    nodeherd()
        .args(["run", "-N", "2", "-M", "3", "--backend", "sim"])
        .args(["--project", temp.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("exceeds"));
    assert!(!temp.path().join("sim").exists());
}

#[test]
fn run_rejects_unknown_scenario() {
    let temp = TempDir::new().unwrap();
    nodeherd()
        .args(["run", "-f", "no-such-case", "--backend", "sim"])
        .args(["--project", temp.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown scenario"));
}

#[test]
fn run_rejects_scenario_needing_more_dnodes() {
    let temp = TempDir::new().unwrap();
    nodeherd()
        .args(["run", "-f", "recreate-mnode", "-N", "3", "--backend", "sim"])
        .args(["--project", temp.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("needs at least 5 dnodes"));
}

#[test]
fn run_rejects_malformed_cfg_dict() {
    let temp = TempDir::new().unwrap();
    nodeherd()
        .args(["run", "-d", "not-base64!", "--backend", "sim"])
        .args(["--project", temp.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("base64"));
}

#[test]
fn status_requires_deployed_cluster() {
    let temp = TempDir::new().unwrap();
    nodeherd()
        .args(["status", "-p", temp.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No cluster deployed"));
}

#[test]
fn stop_requires_deployed_cluster() {
    let temp = TempDir::new().unwrap();
    nodeherd()
        .args(["stop", "-p", temp.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No cluster deployed"));
}
