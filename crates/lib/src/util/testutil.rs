//! Test utilities for storegc-lib.
//!
//! Helpers for building deterministic store paths and small in-memory stores.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::store::{GcPolicy, MemoryRepository, PathInfo, PathKind, Store, StorePath};
use crate::util::hash::hash_bytes;

/// A deterministic store path named `name`.
pub fn path(name: &str) -> StorePath {
  StorePath::from_content(PathKind::Source, &hash_bytes(name.as_bytes()), name).unwrap()
}

/// A memory-backed store plus a handle on its repository.
pub fn memory_store(policy: GcPolicy) -> (Store, Arc<MemoryRepository>) {
  let repo = Arc::new(MemoryRepository::new());
  let store = Store::new(repo.clone(), policy);
  (store, repo)
}

/// Register `name` with the given size and references, returning its path.
pub fn register(store: &Store, name: &str, nar_size: u64, references: &[&StorePath]) -> StorePath {
  let p = path(name);
  let info = PathInfo::new(p.clone(), nar_size).with_references(references.iter().map(|r| (*r).clone()));
  store.register_path(info).unwrap();
  p
}

pub fn set<'a>(paths: impl IntoIterator<Item = &'a StorePath>) -> BTreeSet<StorePath> {
  paths.into_iter().cloned().collect()
}
