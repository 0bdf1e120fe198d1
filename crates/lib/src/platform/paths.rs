use crate::consts::APP_NAME;
use std::path::PathBuf;

/// Environment variable overriding the install root.
pub const ROOT_ENV: &str = "STOREGC_ROOT";

/// Root under which the default store and state directories live.
pub fn root_dir() -> PathBuf {
  if let Some(root) = std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
    return PathBuf::from(root);
  }
  default_root_dir()
}

#[cfg(windows)]
fn default_root_dir() -> PathBuf {
  let drive = std::env::var("SYSTEMDRIVE").unwrap_or_else(|_| "C:".to_string());
  PathBuf::from(format!("{}\\", drive)).join(APP_NAME)
}

#[cfg(not(windows))]
fn default_root_dir() -> PathBuf {
  PathBuf::from("/").join(APP_NAME)
}

/// Default directory holding store objects.
pub fn store_dir() -> PathBuf {
  root_dir().join("store")
}

/// Default directory holding metadata, roots and the GC lock.
pub fn state_dir() -> PathBuf {
  root_dir().join("var")
}

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var_os("USERPROFILE").map(PathBuf::from).unwrap_or_default()
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/"))
}

/// Returns the directory for configuration files for the application
#[cfg(windows)]
pub fn config_dir() -> PathBuf {
  std::env::var_os("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|| home_dir().join("AppData").join("Roaming"))
    .join(APP_NAME)
}

/// Returns the directory for configuration files for the application
#[cfg(not(windows))]
pub fn config_dir() -> PathBuf {
  let config_home = std::env::var("XDG_CONFIG_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".config"));
  config_home.join(APP_NAME)
}
