//! The backing object repository a [`Store`](super::Store) is layered over.
//!
//! A repository owns persistence: it answers lookups, enumerates valid paths
//! and, when it supports garbage collection, exposes roots and deletion
//! through [`GcCapability`]. Callers query that capability explicitly instead
//! of guessing at the concrete repository type.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::RwLock;

use crate::store_lock::StoreLock;

use super::error::StoreResult;
use super::info::PathInfo;
use super::path::StorePath;

pub trait Repository: Send + Sync {
  /// Human-readable identifier used in errors and logs.
  fn uri(&self) -> String;

  /// Look up the validity record for `path`, `None` if it is not registered.
  fn lookup(&self, path: &StorePath) -> StoreResult<Option<PathInfo>>;

  /// Every currently valid path.
  fn enumerate_all(&self) -> StoreResult<BTreeSet<StorePath>>;

  /// Persist a validity record. Validation of references is the caller's job.
  fn insert(&self, info: PathInfo) -> StoreResult<()>;

  /// Paths whose references contain `path`.
  ///
  /// The default scans every record, so it always reflects the current state.
  fn referrers(&self, path: &StorePath) -> StoreResult<BTreeSet<StorePath>> {
    let mut referrers = BTreeSet::new();
    for candidate in self.enumerate_all()? {
      if let Some(info) = self.lookup(&candidate)?
        && info.references.contains(path)
      {
        referrers.insert(candidate);
      }
    }
    Ok(referrers)
  }

  /// Declared outputs of a derivation, `None` if `drv` has no derivation record.
  fn derivation_outputs(&self, drv: &StorePath) -> StoreResult<Option<BTreeMap<String, StorePath>>>;

  /// Record the outputs a derivation is declared to produce.
  fn insert_derivation(&self, drv: &StorePath, outputs: BTreeMap<String, StorePath>) -> StoreResult<()>;

  /// Subset of `candidates` offered by a substitute source.
  fn substitutable(&self, _candidates: &BTreeSet<StorePath>) -> StoreResult<BTreeSet<StorePath>> {
    Ok(BTreeSet::new())
  }

  /// Store the object contents for `path`. Metadata-only repositories ignore this.
  fn write_contents(&self, _path: &StorePath, _contents: &[u8]) -> StoreResult<()> {
    Ok(())
  }

  /// Directory holding object contents, if objects live on the local filesystem.
  fn object_dir(&self) -> Option<PathBuf> {
    None
  }

  /// Process-local exclusion shared by every store over this repository.
  ///
  /// Registration holds it shared, deleting collections exclusively.
  fn exclusion(&self) -> &RwLock<()>;

  /// Inter-process lock held while registering paths.
  fn lock_shared(&self) -> StoreResult<Option<StoreLock>> {
    Ok(None)
  }

  /// Garbage collection support, if any.
  fn gc_capability(&self) -> Option<&dyn GcCapability> {
    None
  }
}

/// Operations a repository must offer for garbage collection.
pub trait GcCapability: Send + Sync {
  /// Paths that must never be deleted.
  fn root_set(&self) -> StoreResult<BTreeSet<StorePath>>;

  /// Register `path` as a root under `name`.
  fn add_root(&self, name: &str, path: &StorePath) -> StoreResult<()>;

  /// Remove the object and its validity record.
  ///
  /// Returns [`StoreError::PathInUse`](super::StoreError::PathInUse) if the
  /// repository refuses; the collector records that and moves on.
  fn delete(&self, path: &StorePath) -> StoreResult<()>;

  /// Inter-process lock held for the duration of a deleting collection.
  fn lock_exclusive(&self) -> StoreResult<Option<StoreLock>> {
    Ok(None)
  }
}
