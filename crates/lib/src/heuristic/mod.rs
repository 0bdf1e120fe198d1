//! Limit-driven garbage selection.
//!
//! Instead of deleting every dead path, the heuristic collector frees roughly a
//! requested amount of bytes or inodes, picking the least valuable garbage
//! first. Value is based on how recently a path was accessed, adjusted by
//! optional penalties that favour deleting derivations, substitutable paths,
//! inode-heavy or large paths.

mod fs;
mod graph;
mod quantity;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::consts::DEFAULT_FRIENDLY_WEIGHT;
use crate::gc::GcOptions;
use crate::store::{PathInUse, Store, StoreError, StorePath};

pub use fs::{StatAgg, path_stat_agg};
pub use graph::GarbageGraph;
pub use quantity::{Quantity, QuantityError, QuantityUnit};

const WEIGHT_BASE: f64 = 7.0;

pub const DEFAULT_SUBSTITUTABLE_WEIGHT: f64 = 1e5;
pub const DEFAULT_DRVS_WEIGHT: f64 = 1e5;
pub const DEFAULT_INODES_WEIGHT: f64 = 1e6;
pub const DEFAULT_SIZE_WEIGHT: f64 = 1e-3;
pub const DEFAULT_EXCEEDING_LIMIT_WEIGHT: f64 = 5e5;

#[derive(Debug, Error)]
pub enum HeuristicError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("failed to build worker pool: {0}")]
  WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Turn a 1-10 weight into a score penalty; 0 disables the penalty.
pub fn unfriendly_weight(friendly: u32, default: f64) -> Option<f64> {
  if friendly == 0 {
    return None;
  }
  Some(WEIGHT_BASE.powi(friendly as i32 - DEFAULT_FRIENDLY_WEIGHT as i32) * default)
}

#[derive(Debug, Clone)]
pub struct HeuristicOptions {
  pub limit: Quantity,
  /// Friendly weights, 0 disables the penalty.
  pub penalize_substitutable: u32,
  pub penalize_drvs: u32,
  pub penalize_inodes: u32,
  pub penalize_size: u32,
  pub penalize_exceeding_limit: u32,
  /// Let referrers pass their access time on to the paths they reference.
  pub inherit_atime: bool,
  /// Worker threads for statistics gathering; `Some(0)` runs inline.
  pub threads: Option<usize>,
  /// Pool used when `threads` is unset. Without one, rayon's global pool.
  pub workers: Option<Arc<rayon::ThreadPool>>,
  pub dry_run: bool,
}

impl HeuristicOptions {
  pub fn new(limit: Quantity) -> Self {
    Self {
      limit,
      penalize_substitutable: 0,
      penalize_drvs: 0,
      penalize_inodes: 0,
      penalize_size: 0,
      penalize_exceeding_limit: 0,
      inherit_atime: false,
      threads: None,
      workers: None,
      dry_run: true,
    }
  }

  pub fn weights(&self) -> Weights {
    Weights {
      substitutable: unfriendly_weight(self.penalize_substitutable, DEFAULT_SUBSTITUTABLE_WEIGHT),
      drvs: unfriendly_weight(self.penalize_drvs, DEFAULT_DRVS_WEIGHT),
      inodes: unfriendly_weight(self.penalize_inodes, DEFAULT_INODES_WEIGHT),
      size: unfriendly_weight(self.penalize_size, DEFAULT_SIZE_WEIGHT),
      exceeding_limit: unfriendly_weight(self.penalize_exceeding_limit, DEFAULT_EXCEEDING_LIMIT_WEIGHT),
    }
  }
}

/// Score penalties; `None` means the penalty is off.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Weights {
  pub substitutable: Option<f64>,
  pub drvs: Option<f64>,
  pub inodes: Option<f64>,
  pub size: Option<f64>,
  pub exceeding_limit: Option<f64>,
}

/// Source of access-time and inode statistics for store paths.
pub trait PathStats: Send + Sync {
  fn stat(&self, path: &StorePath) -> StatAgg;
}

/// Statistics read from object contents on disk.
#[derive(Debug, Clone)]
pub struct FsPathStats {
  store_dir: PathBuf,
}

impl FsPathStats {
  pub fn new(store_dir: impl Into<PathBuf>) -> Self {
    Self {
      store_dir: store_dir.into(),
    }
  }
}

impl PathStats for FsPathStats {
  fn stat(&self, path: &StorePath) -> StatAgg {
    let absolute = path.to_absolute(&self.store_dir);
    path_stat_agg(&absolute).unwrap_or_else(|e| {
      warn!(path = %absolute.display(), error = %e, "failed to stat store path");
      StatAgg::UNREADABLE
    })
  }
}

/// Where per-path work runs.
#[derive(Debug)]
pub enum Executor {
  /// On the calling thread.
  Inline,
  /// On a dedicated pool.
  Pool(Arc<rayon::ThreadPool>),
  /// On rayon's global pool.
  Global,
}

impl Executor {
  /// `None` uses the global pool, `Some(0)` runs inline.
  pub fn from_threads(threads: Option<usize>) -> Result<Self, HeuristicError> {
    Ok(match threads {
      None => Executor::Global,
      Some(0) => Executor::Inline,
      Some(n) => Executor::Pool(Arc::new(rayon::ThreadPoolBuilder::new().num_threads(n).build()?)),
    })
  }

  /// An explicit thread count wins over a shared pool.
  pub fn for_options(options: &HeuristicOptions) -> Result<Self, HeuristicError> {
    match (options.threads, &options.workers) {
      (None, Some(pool)) => Ok(Executor::Pool(Arc::clone(pool))),
      (threads, _) => Executor::from_threads(threads),
    }
  }

  pub fn map<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
  where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Send + Sync,
  {
    match self {
      Executor::Inline => items.into_iter().map(f).collect(),
      Executor::Pool(pool) => pool.install(|| items.into_par_iter().map(f).collect()),
      Executor::Global => items.into_par_iter().map(f).collect(),
    }
  }
}

/// One path chosen for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selected {
  pub path: StorePath,
  pub nar_size: u64,
  pub inodes: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct HeuristicReport {
  /// Paths in the order they were chosen.
  pub selected: Vec<Selected>,
  /// Dead paths whose metadata could not be read.
  pub invalid_paths: BTreeSet<StorePath>,
  pub dry_run: bool,
  pub bytes_freed: u64,
  pub rejected: Vec<PathInUse>,
}

impl HeuristicReport {
  pub fn total_nar_size(&self) -> u64 {
    self.selected.iter().map(|s| s.nar_size).sum()
  }

  pub fn total_inodes(&self) -> u64 {
    self.selected.iter().map(|s| s.inodes).sum()
  }
}

/// Select garbage up to `options.limit` and, unless dry-running, delete it.
pub fn run(store: &Store, options: &HeuristicOptions, stats: &dyn PathStats) -> Result<HeuristicReport, HeuristicError> {
  let executor = Executor::for_options(options)?;

  let mut graph = GarbageGraph::build(
    store,
    options.limit.unit,
    options.weights(),
    options.inherit_atime,
    stats,
    &executor,
  )?;

  let invalid_paths = graph.invalid_paths().clone();
  if !invalid_paths.is_empty() {
    info!(count = invalid_paths.len(), "ignoring dead paths with unreadable metadata");
  }

  info!(limit = %options.limit, "selecting store paths for removal");
  let selected = graph.remove_to_limit(options.limit.value);

  let mut report = HeuristicReport {
    selected,
    invalid_paths,
    dry_run: options.dry_run,
    ..HeuristicReport::default()
  };
  info!(
    dry_run = options.dry_run,
    count = report.selected.len(),
    nar_size = report.total_nar_size(),
    inodes = report.total_inodes(),
    "requesting deletion of selected paths"
  );

  if options.dry_run || report.selected.is_empty() {
    return Ok(report);
  }

  let results = store.collect_garbage(&GcOptions::delete_specific(
    report.selected.iter().map(|s| s.path.clone()),
  ))?;
  report.bytes_freed = results.bytes_freed;
  report.rejected = results.rejected;
  info!(bytes_freed = report.bytes_freed, "heuristic collection complete");

  Ok(report)
}
