//! Process-wide setup of the store subsystem.
//!
//! [`init`] opens the configured store and its worker pool and hands back a
//! [`Handle`]. Only one handle may be live per process; dropping it releases
//! the slot so a later `init` can succeed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, info};

use crate::settings::Settings;
use crate::store::{Store, StoreError};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Error)]
pub enum InitError {
  #[error("the store subsystem is already initialized in this process")]
  AlreadyInitialized,

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("failed to start worker pool: {0}")]
  WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Live store subsystem. Dropping it tears the subsystem down.
#[derive(Debug)]
pub struct Handle {
  settings: Settings,
  store: Arc<Store>,
  workers: Arc<rayon::ThreadPool>,
}

impl Handle {
  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  pub fn store(&self) -> &Arc<Store> {
    &self.store
  }

  /// Pool that runs deferred queries. The CLI also hands it to the heuristic
  /// collector for per-path statistics when no thread count is given.
  pub fn workers(&self) -> &Arc<rayon::ThreadPool> {
    &self.workers
  }
}

impl Drop for Handle {
  fn drop(&mut self) {
    debug!(uri = %self.store.uri(), "releasing store subsystem");
    INITIALIZED.store(false, Ordering::SeqCst);
  }
}

/// Releases the slot if `init` fails after claiming it.
struct Claim(bool);

impl Drop for Claim {
  fn drop(&mut self) {
    if !self.0 {
      INITIALIZED.store(false, Ordering::SeqCst);
    }
  }
}

/// Open the store described by `settings`.
///
/// # Errors
///
/// Returns [`InitError::AlreadyInitialized`] while another [`Handle`] is live,
/// or the error that kept the store or its worker pool from starting.
pub fn init(settings: Settings) -> Result<Handle, InitError> {
  if INITIALIZED
    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
    .is_err()
  {
    return Err(InitError::AlreadyInitialized);
  }
  let mut claim = Claim(false);

  let workers = Arc::new(
    rayon::ThreadPoolBuilder::new()
      .num_threads(settings.max_workers)
      .thread_name(|i| format!("storegc-worker-{}", i))
      .build()?,
  );
  let store = Arc::new(Store::open(&settings)?.with_worker_pool(workers.clone()));

  info!(
    uri = %store.uri(),
    workers = workers.current_num_threads(),
    "store subsystem initialized"
  );
  claim.0 = true;

  Ok(Handle {
    settings,
    store,
    workers,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::TempDir;

  fn settings(temp: &TempDir) -> Settings {
    Settings {
      store_dir: temp.path().join("store"),
      state_dir: temp.path().join("var"),
      max_workers: 2,
      ..Settings::default()
    }
  }

  #[test]
  #[serial]
  fn init_opens_store_directories() {
    let temp = TempDir::new().unwrap();
    let handle = init(settings(&temp)).unwrap();

    assert!(temp.path().join("store").is_dir());
    assert!(temp.path().join("var").is_dir());
    assert_eq!(handle.workers().current_num_threads(), 2);
    assert!(handle.store().uri().starts_with("local://"));
  }

  #[test]
  #[serial]
  fn second_handle_is_refused_until_first_is_dropped() {
    let temp = TempDir::new().unwrap();
    let first = init(settings(&temp)).unwrap();
    assert!(matches!(init(settings(&temp)), Err(InitError::AlreadyInitialized)));

    drop(first);
    assert!(init(settings(&temp)).is_ok());
  }

  #[test]
  #[serial]
  fn failed_init_releases_the_slot() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("file");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let bad = Settings {
      store_dir: blocker.join("store"),
      ..settings(&temp)
    };
    assert!(matches!(init(bad), Err(InitError::Store(_))));
    assert!(init(settings(&temp)).is_ok());
  }

  #[test]
  #[serial]
  fn handle_store_round_trips_text() {
    let temp = TempDir::new().unwrap();
    let handle = init(settings(&temp)).unwrap();
    let store = handle.store();

    let path = store.add_text("hello.txt", b"hello", &Default::default()).unwrap();
    assert!(store.is_valid_path(&path).unwrap());
    assert_eq!(store.query_path_info(&path).unwrap().path, path);
  }
}
