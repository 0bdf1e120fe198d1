//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets its own temporary directory with isolated store, state and
/// config paths.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn empty() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  fn dir(&self, name: &str) -> PathBuf {
    let p = self.temp.path().join(name);
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn store_dir(&self) -> PathBuf {
    self.dir("store")
  }

  pub fn state_dir(&self) -> PathBuf {
    self.dir("var")
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  /// Get a pre-configured Command for the storegc binary.
  ///
  /// Points the store and state directories into the temp directory and
  /// hides any user configuration.
  pub fn storegc_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("storegc");
    cmd.env("STOREGC_STORE_DIR", self.store_dir());
    cmd.env("STOREGC_STATE_DIR", self.state_dir());
    cmd.env("XDG_CONFIG_HOME", self.dir("config"));
    for key in [
      "STOREGC_CONFIG",
      "STOREGC_KEEP_OUTPUTS",
      "STOREGC_KEEP_DERIVATIONS",
      "STOREGC_SUBSTITUTERS",
      "RUST_LOG",
    ] {
      cmd.env_remove(key);
    }
    cmd
  }

  /// Add an object via `storegc add` and return its bare store path.
  pub fn add(&self, name: &str, contents: &str, references: &[&str], root: Option<&str>) -> String {
    let file = self.write_file(&format!("inputs/{}", name), contents);
    let mut cmd = self.storegc_cmd();
    cmd.arg("add").arg(name).arg(&file);
    for reference in references {
      cmd.args(["--reference", reference]);
    }
    if let Some(root) = root {
      cmd.args(["--root", root]);
    }

    let out = cmd.assert().success().get_output().stdout.clone();
    let stdout = String::from_utf8(out).unwrap();
    let line = stdout.lines().next().unwrap();
    Path::new(line).file_name().unwrap().to_string_lossy().into_owned()
  }

  /// Whether the object for `path` is still on disk.
  pub fn object_exists(&self, path: &str) -> bool {
    self.store_dir().join(path).exists()
  }
}
