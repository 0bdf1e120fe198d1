use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::store_lock::StoreLockError;

use super::path::StorePath;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("invalid store path '{path}': {reason}")]
  InvalidPathFormat { path: String, reason: String },

  #[error("path '{0}' is not valid")]
  PathNotValid(StorePath),

  #[error("store '{uri}' is unavailable: {message}")]
  StoreUnavailable { uri: String, message: String },

  #[error("path '{0}' is not a derivation")]
  NotADerivation(StorePath),

  #[error("cycle detected in the references of {}", format_cycle(.cycle))]
  CyclicReference { cycle: Vec<StorePath> },

  #[error(transparent)]
  PathInUse(#[from] PathInUse),

  #[error("store '{0}' does not support garbage collection")]
  GcUnsupported(String),

  #[error(transparent)]
  StoreLocked(#[from] StoreLockError),

  #[error("garbage collection was cancelled before any path was deleted")]
  Cancelled,

  #[error("failed to serialize metadata for '{path}': {source}")]
  Serialization {
    path: StorePath,
    #[source]
    source: serde_json::Error,
  },
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
  /// Wrap an I/O or backend failure as an unavailable store.
  pub fn unavailable(uri: impl Into<String>, err: impl fmt::Display) -> Self {
    StoreError::StoreUnavailable {
      uri: uri.into(),
      message: err.to_string(),
    }
  }
}

fn format_cycle(cycle: &[StorePath]) -> String {
  cycle.iter().map(|p| format!("'{}'", p)).collect::<Vec<_>>().join(" -> ")
}

/// Why a path could not be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InUseReason {
  /// Reachable from a GC root.
  Live,
  /// Still referenced by a path that survives this collection.
  Referenced { referrer: StorePath },
  /// The repository refused to remove it.
  Repository { message: String },
}

/// A per-path deletion rejection.
///
/// Collected into the GC results instead of aborting the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("cannot delete path '{path}' since it is still in use ({reason})")]
pub struct PathInUse {
  pub path: StorePath,
  pub reason: InUseReason,
}

impl fmt::Display for InUseReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      InUseReason::Live => write!(f, "reachable from a GC root"),
      InUseReason::Referenced { referrer } => write!(f, "referenced by '{}'", referrer),
      InUseReason::Repository { message } => write!(f, "{}", message),
    }
  }
}
