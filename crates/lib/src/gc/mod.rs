//! Reference-tracing garbage collection.
//!
//! A run computes the live set as everything reachable from the repository's
//! roots, then either reports live or dead paths or deletes dead ones. Deleting
//! runs hold the repository's process-local exclusion exclusively, plus the repository's
//! inter-process lock when it has one, from computing the live set until the
//! last deletion.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::graph::{EdgeKind, ReferenceGraph};
use crate::store::{GcCapability, InUseReason, PathInUse, PathInfo, Store, StoreError, StorePath, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GcAction {
  /// Report the live set without changing anything.
  ReturnLive,
  /// Report the dead set without changing anything.
  #[default]
  ReturnDead,
  /// Delete every dead path.
  DeleteDead,
  /// Delete the given paths if they are dead.
  DeleteSpecific,
}

impl GcAction {
  pub fn deletes(self) -> bool {
    matches!(self, GcAction::DeleteDead | GcAction::DeleteSpecific)
  }
}

#[derive(Debug, Clone, Default)]
pub struct GcOptions {
  pub action: GcAction,
  /// Candidates for [`GcAction::DeleteSpecific`].
  pub paths_to_delete: BTreeSet<StorePath>,
  /// Stop deleting once at least this many bytes were freed.
  pub max_freed: Option<u64>,
}

impl GcOptions {
  pub fn return_live() -> Self {
    Self {
      action: GcAction::ReturnLive,
      ..Self::default()
    }
  }

  pub fn return_dead() -> Self {
    Self::default()
  }

  pub fn delete_dead() -> Self {
    Self {
      action: GcAction::DeleteDead,
      ..Self::default()
    }
  }

  pub fn delete_specific(paths: impl IntoIterator<Item = StorePath>) -> Self {
    Self {
      action: GcAction::DeleteSpecific,
      paths_to_delete: paths.into_iter().collect(),
      max_freed: None,
    }
  }

  pub fn with_max_freed(mut self, bytes: u64) -> Self {
    self.max_freed = Some(bytes);
    self
  }
}

/// Outcome of a collection.
#[derive(Debug, Default, Serialize)]
pub struct GcResults {
  /// Live or dead paths for the reporting actions; deleted paths otherwise.
  pub paths: BTreeSet<StorePath>,
  pub bytes_freed: u64,
  /// Paths that were asked for but could not be deleted.
  pub rejected: Vec<PathInUse>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
  Idle,
  ComputingLiveSet,
  Deleting,
  Done,
}

/// Shared flag that stops a collection before it starts deleting.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

pub struct GarbageCollector<'a> {
  store: &'a Store,
  state: GcState,
  cancel: CancelToken,
}

/// Every valid path with its record, and the graph used to trace liveness.
struct Snapshot {
  infos: BTreeMap<StorePath, PathInfo>,
  graph: ReferenceGraph,
}

impl<'a> GarbageCollector<'a> {
  pub fn new(store: &'a Store) -> Self {
    Self {
      store,
      state: GcState::Idle,
      cancel: CancelToken::new(),
    }
  }

  pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn state(&self) -> GcState {
    self.state
  }

  pub fn cancel_token(&self) -> CancelToken {
    self.cancel.clone()
  }

  pub fn collect(&mut self, options: &GcOptions) -> StoreResult<GcResults> {
    self.state = GcState::Idle;
    let result = self.run(options);
    self.state = GcState::Done;
    result
  }

  fn run(&mut self, options: &GcOptions) -> StoreResult<GcResults> {
    let store = self.store;
    let gc = store
      .gc_capability()
      .ok_or_else(|| StoreError::GcUnsupported(store.uri()))?;

    let deleting = options.action.deletes();
    let _guard = if deleting {
      Some(store.registration_exclusive()?)
    } else {
      None
    };
    let _lock = if deleting { gc.lock_exclusive()? } else { None };

    self.state = GcState::ComputingLiveSet;
    let snapshot = self.snapshot()?;
    let roots = gc.root_set()?;
    let live = snapshot.graph.closure(&roots, &self.edge_kinds());
    info!(
      action = ?options.action,
      valid = snapshot.infos.len(),
      roots = roots.len(),
      live = live.len(),
      "computed live set"
    );

    let mut results = GcResults::default();
    let candidates = match options.action {
      GcAction::ReturnLive => {
        results.paths = live;
        return Ok(results);
      }
      GcAction::ReturnDead => {
        results.paths = dead_paths(&snapshot, &live);
        return Ok(results);
      }
      GcAction::DeleteDead => dead_paths(&snapshot, &live),
      GcAction::DeleteSpecific => {
        self.select_specific(&snapshot, &live, &options.paths_to_delete, &mut results.rejected)
      }
    };

    if self.cancel.is_cancelled() {
      info!("garbage collection cancelled before deletion");
      return Err(StoreError::Cancelled);
    }

    self.state = GcState::Deleting;
    delete_paths(gc, &snapshot, &candidates, options.max_freed, &mut results)?;

    info!(
      deleted = results.paths.len(),
      rejected = results.rejected.len(),
      bytes_freed = results.bytes_freed,
      "garbage collection complete"
    );
    Ok(results)
  }

  fn edge_kinds(&self) -> Vec<EdgeKind> {
    let policy = self.store.policy();
    let mut kinds = vec![EdgeKind::Reference];
    if policy.keep_outputs {
      kinds.push(EdgeKind::DrvOutput);
    }
    if policy.keep_derivations {
      kinds.push(EdgeKind::OutputDrv);
    }
    kinds
  }

  fn snapshot(&self) -> StoreResult<Snapshot> {
    let repo = self.store.repository();

    let mut infos = BTreeMap::new();
    for path in repo.enumerate_all()? {
      match repo.lookup(&path)? {
        Some(info) => {
          infos.insert(path, info);
        }
        None => debug!(path = %path, "path vanished while collecting"),
      }
    }

    let mut graph = ReferenceGraph::from_infos(infos.values());
    for (path, info) in &infos {
      if let Some(deriver) = &info.deriver {
        graph.add_edge(path, deriver, EdgeKind::OutputDrv);
      }
      if !path.is_derivation() {
        continue;
      }
      for output in repo.derivation_outputs(path)?.unwrap_or_default().values() {
        graph.add_edge(path, output, EdgeKind::DrvOutput);
        graph.add_edge(output, path, EdgeKind::OutputDrv);
      }
    }

    Ok(Snapshot { infos, graph })
  }

  /// Narrow the requested candidates to paths that can be deleted without
  /// leaving a surviving path with a dangling reference.
  fn select_specific(
    &self,
    snapshot: &Snapshot,
    live: &BTreeSet<StorePath>,
    requested: &BTreeSet<StorePath>,
    rejected: &mut Vec<PathInUse>,
  ) -> BTreeSet<StorePath> {
    let mut candidates = BTreeSet::new();
    for path in requested {
      if !snapshot.infos.contains_key(path) {
        warn!(path = %path, "skipping path that is not valid");
      } else if live.contains(path) {
        warn!(path = %path, "refusing to delete live path");
        rejected.push(PathInUse {
          path: path.clone(),
          reason: InUseReason::Live,
        });
      } else {
        candidates.insert(path.clone());
      }
    }

    // Rejecting one candidate can strand another it references, so iterate.
    loop {
      let blocked: Vec<(StorePath, StorePath)> = candidates
        .iter()
        .filter_map(|path| {
          snapshot
            .graph
            .referrers(path)
            .into_iter()
            .find(|referrer| !candidates.contains(referrer))
            .map(|referrer| (path.clone(), referrer))
        })
        .collect();

      if blocked.is_empty() {
        break;
      }
      for (path, referrer) in blocked {
        warn!(path = %path, referrer = %referrer, "refusing to delete referenced path");
        candidates.remove(&path);
        rejected.push(PathInUse {
          path,
          reason: InUseReason::Referenced { referrer },
        });
      }
    }

    candidates
  }
}

fn dead_paths(snapshot: &Snapshot, live: &BTreeSet<StorePath>) -> BTreeSet<StorePath> {
  snapshot
    .infos
    .keys()
    .filter(|path| !live.contains(*path))
    .cloned()
    .collect()
}

fn delete_paths(
  gc: &dyn GcCapability,
  snapshot: &Snapshot,
  candidates: &BTreeSet<StorePath>,
  max_freed: Option<u64>,
  results: &mut GcResults,
) -> StoreResult<()> {
  let order = snapshot
    .graph
    .subgraph(candidates, &[EdgeKind::Reference])
    .deletion_order();

  // Paths the repository refused; their references must survive too.
  let mut kept: BTreeSet<StorePath> = BTreeSet::new();

  for path in order {
    if let Some(limit) = max_freed
      && results.bytes_freed >= limit
    {
      info!(limit, bytes_freed = results.bytes_freed, "reached deletion limit");
      break;
    }

    if let Some(referrer) = snapshot.graph.referrers(&path).into_iter().find(|r| kept.contains(r)) {
      warn!(path = %path, referrer = %referrer, "keeping path referenced by an undeletable path");
      results.rejected.push(PathInUse {
        path: path.clone(),
        reason: InUseReason::Referenced { referrer },
      });
      kept.insert(path);
      continue;
    }

    match gc.delete(&path) {
      Ok(()) => {
        let size = snapshot.infos.get(&path).map_or(0, |info| info.nar_size);
        debug!(path = %path, size, "deleted");
        results.bytes_freed += size;
        results.paths.insert(path);
      }
      Err(StoreError::PathInUse(rejection)) => {
        warn!(path = %path, reason = %rejection.reason, "repository refused deletion");
        results.rejected.push(rejection);
        kept.insert(path);
      }
      Err(e) => return Err(e),
    }
  }

  Ok(())
}
