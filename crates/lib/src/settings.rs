//! Store configuration.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment variables. The config file is `$STOREGC_CONFIG` if set,
//! otherwise `config.toml` in the platform config directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::platform::paths::{config_dir, state_dir, store_dir};
use crate::store::GcPolicy;

pub const CONFIG_ENV: &str = "STOREGC_CONFIG";
pub const STORE_DIR_ENV: &str = "STOREGC_STORE_DIR";
pub const STATE_DIR_ENV: &str = "STOREGC_STATE_DIR";
pub const KEEP_OUTPUTS_ENV: &str = "STOREGC_KEEP_OUTPUTS";
pub const KEEP_DERIVATIONS_ENV: &str = "STOREGC_KEEP_DERIVATIONS";
pub const SUBSTITUTERS_ENV: &str = "STOREGC_SUBSTITUTERS";

#[derive(Debug, Error)]
pub enum SettingsError {
  #[error("failed to read config file {}: {source}", path.display())]
  Read { path: PathBuf, source: std::io::Error },

  #[error("failed to parse config file {}: {source}", path.display())]
  Parse { path: PathBuf, source: toml::de::Error },

  #[error("invalid value '{value}' for {key}: {reason}")]
  InvalidValue { key: String, value: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Settings {
  /// Directory holding store objects.
  pub store_dir: PathBuf,
  /// Directory holding metadata, GC roots and the GC lock.
  pub state_dir: PathBuf,
  /// A live derivation keeps its outputs alive.
  pub keep_outputs: bool,
  /// A live output keeps its deriving derivation alive.
  pub keep_derivations: bool,
  /// Directories offering `<hash>.narinfo` files for substitution queries.
  pub substituters: Vec<PathBuf>,
  /// Worker threads for deferred queries and scoring; 0 picks the CPU count.
  pub max_workers: usize,
}

impl Default for Settings {
  fn default() -> Self {
    let policy = GcPolicy::default();
    Self {
      store_dir: store_dir(),
      state_dir: state_dir(),
      keep_outputs: policy.keep_outputs,
      keep_derivations: policy.keep_derivations,
      substituters: Vec::new(),
      max_workers: 0,
    }
  }
}

impl Settings {
  /// Load settings from the default config file location and environment.
  pub fn load() -> Result<Self, SettingsError> {
    Self::load_from(None)
  }

  /// Like [`load`](Self::load), reading `config` instead of the default file.
  ///
  /// An explicitly named file must exist; the default one is optional.
  pub fn load_from(config: Option<&Path>) -> Result<Self, SettingsError> {
    let explicit = config
      .map(Path::to_path_buf)
      .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    let mut settings = match explicit {
      Some(path) => Self::from_file(&path)?,
      None => {
        let path = default_config_path();
        if path.is_file() {
          Self::from_file(&path)?
        } else {
          Self::default()
        }
      }
    };

    settings.apply_env()?;
    Ok(settings)
  }

  pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let settings = toml::from_str(&content).map_err(|source| SettingsError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(path = %path.display(), "loaded config file");
    Ok(settings)
  }

  /// Override fields from `STOREGC_*` environment variables.
  pub fn apply_env(&mut self) -> Result<(), SettingsError> {
    if let Some(dir) = env_nonempty(STORE_DIR_ENV) {
      self.store_dir = PathBuf::from(dir);
    }
    if let Some(dir) = env_nonempty(STATE_DIR_ENV) {
      self.state_dir = PathBuf::from(dir);
    }
    if let Some(value) = env_nonempty(KEEP_OUTPUTS_ENV) {
      self.keep_outputs = parse_bool(KEEP_OUTPUTS_ENV, &value)?;
    }
    if let Some(value) = env_nonempty(KEEP_DERIVATIONS_ENV) {
      self.keep_derivations = parse_bool(KEEP_DERIVATIONS_ENV, &value)?;
    }
    if let Some(value) = std::env::var_os(SUBSTITUTERS_ENV) {
      self.substituters = std::env::split_paths(&value)
        .filter(|p| !p.as_os_str().is_empty())
        .collect();
    }
    Ok(())
  }

  pub fn policy(&self) -> GcPolicy {
    GcPolicy {
      keep_outputs: self.keep_outputs,
      keep_derivations: self.keep_derivations,
    }
  }
}

pub fn default_config_path() -> PathBuf {
  config_dir().join("config.toml")
}

fn env_nonempty(key: &str) -> Option<String> {
  std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_bool(key: &str, value: &str) -> Result<bool, SettingsError> {
  match value.to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    _ => Err(SettingsError::InvalidValue {
      key: key.to_string(),
      value: value.to_string(),
      reason: "expected a boolean".to_string(),
    }),
  }
}
