//! In-memory repository for tests and embedding.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::error::{InUseReason, PathInUse, StoreError, StoreResult};
use super::info::PathInfo;
use super::path::StorePath;
use super::repository::{GcCapability, Repository};

const URI: &str = "memory://";

#[derive(Debug, Default)]
struct MemoryState {
  infos: BTreeMap<StorePath, PathInfo>,
  /// Inverse of `PathInfo::references`, maintained on insert and delete.
  referrers: BTreeMap<StorePath, BTreeSet<StorePath>>,
  derivations: BTreeMap<StorePath, BTreeMap<String, StorePath>>,
  contents: BTreeMap<StorePath, Vec<u8>>,
  roots: BTreeMap<String, StorePath>,
  substitutes: BTreeSet<StorePath>,
  pinned: BTreeSet<StorePath>,
}

/// Repository keeping every record in ordered maps behind a lock.
#[derive(Debug)]
pub struct MemoryRepository {
  state: RwLock<MemoryState>,
  exclusion: RwLock<()>,
  gc_enabled: bool,
}

impl Default for MemoryRepository {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryRepository {
  pub fn new() -> Self {
    Self {
      state: RwLock::new(MemoryState::default()),
      exclusion: RwLock::new(()),
      gc_enabled: true,
    }
  }

  /// A repository that reports no garbage collection capability.
  pub fn without_gc() -> Self {
    Self {
      gc_enabled: false,
      ..Self::new()
    }
  }

  /// Offer `path` from a pretend substitute source.
  pub fn add_substitute(&self, path: StorePath) -> StoreResult<()> {
    self.write()?.substitutes.insert(path);
    Ok(())
  }

  /// Make the repository refuse to delete `path`, as if it were open elsewhere.
  pub fn pin(&self, path: StorePath) -> StoreResult<()> {
    self.write()?.pinned.insert(path);
    Ok(())
  }

  pub fn remove_root(&self, name: &str) -> StoreResult<()> {
    self.write()?.roots.remove(name);
    Ok(())
  }

  pub fn contents(&self, path: &StorePath) -> StoreResult<Option<Vec<u8>>> {
    Ok(self.read()?.contents.get(path).cloned())
  }

  fn read(&self) -> StoreResult<RwLockReadGuard<'_, MemoryState>> {
    self.state.read().map_err(|e| StoreError::unavailable(URI, e))
  }

  fn write(&self) -> StoreResult<RwLockWriteGuard<'_, MemoryState>> {
    self.state.write().map_err(|e| StoreError::unavailable(URI, e))
  }
}

impl Repository for MemoryRepository {
  fn uri(&self) -> String {
    URI.to_string()
  }

  fn lookup(&self, path: &StorePath) -> StoreResult<Option<PathInfo>> {
    Ok(self.read()?.infos.get(path).cloned())
  }

  fn enumerate_all(&self) -> StoreResult<BTreeSet<StorePath>> {
    Ok(self.read()?.infos.keys().cloned().collect())
  }

  fn insert(&self, info: PathInfo) -> StoreResult<()> {
    let mut state = self.write()?;

    if let Some(previous) = state.infos.remove(&info.path) {
      for reference in &previous.references {
        if let Some(set) = state.referrers.get_mut(reference) {
          set.remove(&previous.path);
        }
      }
    }

    for reference in &info.references {
      state
        .referrers
        .entry(reference.clone())
        .or_default()
        .insert(info.path.clone());
    }
    state.infos.insert(info.path.clone(), info);

    Ok(())
  }

  fn referrers(&self, path: &StorePath) -> StoreResult<BTreeSet<StorePath>> {
    Ok(self.read()?.referrers.get(path).cloned().unwrap_or_default())
  }

  fn derivation_outputs(&self, drv: &StorePath) -> StoreResult<Option<BTreeMap<String, StorePath>>> {
    Ok(self.read()?.derivations.get(drv).cloned())
  }

  fn insert_derivation(&self, drv: &StorePath, outputs: BTreeMap<String, StorePath>) -> StoreResult<()> {
    self.write()?.derivations.insert(drv.clone(), outputs);
    Ok(())
  }

  fn substitutable(&self, candidates: &BTreeSet<StorePath>) -> StoreResult<BTreeSet<StorePath>> {
    let state = self.read()?;
    Ok(
      candidates
        .iter()
        .filter(|p| state.substitutes.contains(*p))
        .cloned()
        .collect(),
    )
  }

  fn write_contents(&self, path: &StorePath, contents: &[u8]) -> StoreResult<()> {
    self.write()?.contents.insert(path.clone(), contents.to_vec());
    Ok(())
  }

  fn exclusion(&self) -> &RwLock<()> {
    &self.exclusion
  }

  fn gc_capability(&self) -> Option<&dyn GcCapability> {
    if self.gc_enabled { Some(self) } else { None }
  }
}

impl GcCapability for MemoryRepository {
  fn root_set(&self) -> StoreResult<BTreeSet<StorePath>> {
    Ok(self.read()?.roots.values().cloned().collect())
  }

  fn add_root(&self, name: &str, path: &StorePath) -> StoreResult<()> {
    self.write()?.roots.insert(name.to_string(), path.clone());
    Ok(())
  }

  fn delete(&self, path: &StorePath) -> StoreResult<()> {
    let mut state = self.write()?;

    if state.pinned.contains(path) {
      return Err(
        PathInUse {
          path: path.clone(),
          reason: InUseReason::Repository {
            message: "path is pinned".to_string(),
          },
        }
        .into(),
      );
    }

    let Some(info) = state.infos.remove(path) else {
      return Ok(());
    };
    for reference in &info.references {
      if let Some(set) = state.referrers.get_mut(reference) {
        set.remove(path);
        if set.is_empty() {
          state.referrers.remove(reference);
        }
      }
    }
    state.derivations.remove(path);
    state.contents.remove(path);

    Ok(())
  }
}
