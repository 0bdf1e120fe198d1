//! CLI smoke tests for storegc.
//!
//! These tests verify that all CLI commands run without panicking and
//! return appropriate exit codes against an empty store.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// A storegc command isolated inside `temp`.
fn storegc_cmd(temp: &TempDir) -> Command {
  let mut cmd: Command = cargo_bin_cmd!("storegc");
  cmd.env("STOREGC_STORE_DIR", temp.path().join("store"));
  cmd.env("STOREGC_STATE_DIR", temp.path().join("var"));
  cmd.env("XDG_CONFIG_HOME", temp.path().join("config"));
  cmd.env_remove("STOREGC_CONFIG");
  cmd.env_remove("STOREGC_KEEP_OUTPUTS");
  cmd.env_remove("STOREGC_KEEP_DERIVATIONS");
  cmd.env_remove("STOREGC_SUBSTITUTERS");
  cmd
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  cargo_bin_cmd!("storegc")
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  cargo_bin_cmd!("storegc")
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("storegc"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &[
    "gc",
    "delete",
    "heuristic",
    "path-info",
    "referrers",
    "topo-sort",
    "outputs",
    "add",
    "roots",
  ] {
    cargo_bin_cmd!("storegc")
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// Empty store
// =============================================================================

#[test]
fn gc_on_empty_store_succeeds() {
  let temp = TempDir::new().unwrap();
  storegc_cmd(&temp)
    .arg("gc")
    .assert()
    .success()
    .stdout(predicate::str::contains("Garbage collection complete"));
}

#[test]
fn gc_creates_store_layout() {
  let temp = TempDir::new().unwrap();
  storegc_cmd(&temp).args(["gc", "--dry-run"]).assert().success();

  assert!(temp.path().join("store").is_dir());
  assert!(temp.path().join("var").join("gcroots").is_dir());
}

#[test]
fn roots_on_empty_store_prints_nothing() {
  let temp = TempDir::new().unwrap();
  storegc_cmd(&temp)
    .arg("roots")
    .assert()
    .success()
    .stdout(predicate::str::is_empty());
}

#[test]
fn heuristic_on_empty_store_has_nothing_to_delete() {
  let temp = TempDir::new().unwrap();
  storegc_cmd(&temp)
    .args(["heuristic", "1G", "--dry-run"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to delete"));
}

// =============================================================================
// Argument errors
// =============================================================================

#[test]
fn invalid_store_path_is_rejected() {
  let temp = TempDir::new().unwrap();
  storegc_cmd(&temp)
    .args(["path-info", "not-a-store-path"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Invalid store path"));
}

#[test]
fn ambiguous_heuristic_limit_is_rejected() {
  let temp = TempDir::new().unwrap();
  storegc_cmd(&temp)
    .args(["heuristic", "3BI"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("ambiguous"));
}

#[test]
fn inode_max_freed_is_rejected() {
  let temp = TempDir::new().unwrap();
  storegc_cmd(&temp)
    .args(["gc", "--max-freed", "10I"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("expected a size in bytes"));
}

#[test]
fn missing_explicit_config_fails() {
  let temp = TempDir::new().unwrap();
  storegc_cmd(&temp)
    .args(["--config", "/nonexistent/storegc.toml", "roots"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load settings"));
}

#[test]
fn unknown_config_key_fails() {
  let temp = TempDir::new().unwrap();
  let config = temp.path().join("storegc.toml");
  std::fs::write(&config, "keep-everything = true\n").unwrap();

  storegc_cmd(&temp)
    .arg("--config")
    .arg(&config)
    .arg("roots")
    .assert()
    .failure();
}
