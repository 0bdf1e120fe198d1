//! Content-addressed object store.
//!
//! A [`Store`] is the capability surface callers use: registration, validity
//! queries, referrer lookups and topological sorting. Persistence is delegated
//! to a [`Repository`]; garbage collection is available when the repository
//! exposes a [`GcCapability`].

pub mod error;
pub mod info;
pub mod local;
pub mod memory;
pub mod path;
pub mod repository;

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};
use std::task::{Context, Poll};

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::consts::DRV_EXTENSION;
use crate::gc::{GarbageCollector, GcOptions, GcResults};
use crate::graph::ReferenceGraph;
use crate::settings::Settings;
use crate::util::hash::hash_bytes;

pub use error::{InUseReason, PathInUse, StoreError, StoreResult};
pub use info::PathInfo;
pub use local::LocalRepository;
pub use memory::MemoryRepository;
pub use path::{PathKind, StorePath};
pub use repository::{GcCapability, Repository};

/// Liveness policy applied on top of the root set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GcPolicy {
  /// A live derivation keeps its outputs alive.
  pub keep_outputs: bool,
  /// A live output keeps its deriving derivation alive.
  pub keep_derivations: bool,
}

impl Default for GcPolicy {
  fn default() -> Self {
    Self {
      keep_outputs: false,
      keep_derivations: true,
    }
  }
}

/// A registered derivation and the output paths it declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Derivation {
  pub path: StorePath,
  pub outputs: BTreeMap<String, StorePath>,
}

pub struct Store {
  repo: Arc<dyn Repository>,
  policy: GcPolicy,
  workers: Option<Arc<rayon::ThreadPool>>,
}

impl std::fmt::Debug for Store {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Store")
      .field("uri", &self.repo.uri())
      .field("policy", &self.policy)
      .finish_non_exhaustive()
  }
}

impl Store {
  pub fn new(repo: Arc<dyn Repository>, policy: GcPolicy) -> Self {
    Self {
      repo,
      policy,
      workers: None,
    }
  }

  /// Open the directory-backed store described by `settings`.
  pub fn open(settings: &Settings) -> StoreResult<Self> {
    let repo = LocalRepository::open(settings)?;
    Ok(Self::new(Arc::new(repo), settings.policy()))
  }

  /// Run deferred queries on `pool` instead of rayon's global pool.
  pub fn with_worker_pool(mut self, pool: Arc<rayon::ThreadPool>) -> Self {
    self.workers = Some(pool);
    self
  }

  pub fn uri(&self) -> String {
    self.repo.uri()
  }

  pub fn policy(&self) -> GcPolicy {
    self.policy
  }

  pub fn repository(&self) -> &Arc<dyn Repository> {
    &self.repo
  }

  /// Garbage collection support of the backing repository, if any.
  pub fn gc_capability(&self) -> Option<&dyn GcCapability> {
    self.repo.gc_capability()
  }

  pub(crate) fn registration_shared(&self) -> StoreResult<RwLockReadGuard<'_, ()>> {
    self.repo.exclusion().read().map_err(|e| StoreError::unavailable(self.uri(), e))
  }

  pub(crate) fn registration_exclusive(&self) -> StoreResult<RwLockWriteGuard<'_, ()>> {
    self.repo.exclusion().write().map_err(|e| StoreError::unavailable(self.uri(), e))
  }

  pub fn query_path_info(&self, path: &StorePath) -> StoreResult<PathInfo> {
    lookup_valid(self.repo.as_ref(), path)
  }

  /// Run [`query_path_info`](Self::query_path_info) on a worker thread.
  ///
  /// The returned future resolves exactly once with the result or the error
  /// and can be awaited from any executor, or waited on synchronously.
  pub fn query_path_info_deferred(&self, path: &StorePath) -> PathInfoFuture {
    let (tx, rx) = oneshot::channel();
    let repo = Arc::clone(&self.repo);
    let path = path.clone();

    let job = move || {
      let result = lookup_valid(repo.as_ref(), &path);
      // The receiver may have been dropped; nobody is waiting then.
      let _ = tx.send(result);
    };
    match &self.workers {
      Some(pool) => pool.spawn(job),
      None => rayon::spawn(job),
    }

    PathInfoFuture { rx, uri: self.uri() }
  }

  pub async fn query_path_info_async(&self, path: &StorePath) -> StoreResult<PathInfo> {
    self.query_path_info_deferred(path).await
  }

  pub fn is_valid_path(&self, path: &StorePath) -> StoreResult<bool> {
    Ok(self.repo.lookup(path)?.is_some())
  }

  pub fn query_all_valid_paths(&self) -> StoreResult<BTreeSet<StorePath>> {
    self.repo.enumerate_all()
  }

  /// Paths that currently reference `path`. Empty if there are none.
  pub fn query_referrers(&self, path: &StorePath) -> StoreResult<BTreeSet<StorePath>> {
    self.repo.referrers(path)
  }

  pub fn query_references(&self, path: &StorePath) -> StoreResult<BTreeSet<StorePath>> {
    Ok(self.query_path_info(path)?.references)
  }

  /// Declared outputs of a derivation, keyed by output name.
  pub fn query_derivation_output_map(&self, drv: &StorePath) -> StoreResult<BTreeMap<String, StorePath>> {
    self
      .repo
      .derivation_outputs(drv)?
      .ok_or_else(|| StoreError::NotADerivation(drv.clone()))
  }

  pub fn query_derivation_outputs(&self, drv: &StorePath) -> StoreResult<BTreeSet<StorePath>> {
    Ok(self.query_derivation_output_map(drv)?.into_values().collect())
  }

  /// Candidates that are not valid locally but offered by a substitute source.
  pub fn query_substitutable_paths(&self, candidates: &BTreeSet<StorePath>) -> StoreResult<BTreeSet<StorePath>> {
    let mut missing = BTreeSet::new();
    for candidate in candidates {
      if self.repo.lookup(candidate)?.is_none() {
        missing.insert(candidate.clone());
      }
    }
    if missing.is_empty() {
      return Ok(missing);
    }
    self.repo.substitutable(&missing)
  }

  /// Sort `paths` so that every path comes after the paths it references.
  ///
  /// Only references within `paths` are considered. Fails with
  /// [`StoreError::CyclicReference`] if they form a cycle.
  pub fn topo_sort_paths(&self, paths: &BTreeSet<StorePath>) -> StoreResult<Vec<StorePath>> {
    let infos = paths
      .iter()
      .map(|p| self.query_path_info(p))
      .collect::<StoreResult<Vec<_>>>()?;

    ReferenceGraph::from_infos(&infos).topo_sort()
  }

  /// Register a validity record.
  ///
  /// Every reference other than the path itself must already be valid.
  /// Records are immutable once valid, so registering a valid path again
  /// leaves its existing record in place.
  pub fn register_path(&self, info: PathInfo) -> StoreResult<()> {
    let _guard = self.registration_shared()?;
    let _lock = self.repo.lock_shared()?;

    if self.repo.lookup(&info.path)?.is_some() {
      debug!(path = %info.path, "path is already valid");
      return Ok(());
    }

    for reference in info.foreign_references() {
      if self.repo.lookup(reference)?.is_none() {
        return Err(StoreError::PathNotValid(reference.clone()));
      }
    }
    if let Some(deriver) = &info.deriver
      && self.repo.derivation_outputs(deriver)?.is_none()
    {
      debug!(path = %info.path, deriver = %deriver, "deriver has no derivation record");
    }

    debug!(path = %info.path, references = info.references.len(), "registering path");
    self.repo.insert(info)
  }

  /// Store `contents` as a text object and register it.
  ///
  /// Adding the same contents twice returns the existing path.
  pub fn add_text(&self, name: &str, contents: &[u8], references: &BTreeSet<StorePath>) -> StoreResult<StorePath> {
    let path = StorePath::from_content(PathKind::Text { references }, &hash_bytes(contents), name)?;
    if self.is_valid_path(&path)? {
      return Ok(path);
    }

    self.repo.write_contents(&path, contents)?;
    let info = PathInfo::new(path.clone(), contents.len() as u64)
      .with_references(references.iter().cloned())
      .with_ultimate(true);
    self.register_path(info)?;

    info!(path = %path, "added text object");
    Ok(path)
  }

  /// Store a derivation and record the output paths it declares.
  ///
  /// `name` must end in `.drv`. Outputs are named `<name>` for `out` and
  /// `<name>-<output>` otherwise; they are not registered as valid.
  pub fn add_derivation(
    &self,
    name: &str,
    contents: &[u8],
    references: &BTreeSet<StorePath>,
    outputs: &[&str],
  ) -> StoreResult<Derivation> {
    let Some(base) = name.strip_suffix(DRV_EXTENSION) else {
      return Err(StoreError::InvalidPathFormat {
        path: name.to_string(),
        reason: format!("derivation names must end in '{}'", DRV_EXTENSION),
      });
    };

    let path = self.add_text(name, contents, references)?;

    let drv_hash = hash_bytes(path.as_str().as_bytes());
    let mut output_paths = BTreeMap::new();
    for output in outputs {
      let output_name = if *output == "out" {
        base.to_string()
      } else {
        format!("{}-{}", base, output)
      };
      let output_path = StorePath::from_content(PathKind::Output { name: *output }, &drv_hash, &output_name)?;
      output_paths.insert((*output).to_string(), output_path);
    }

    self.repo.insert_derivation(&path, output_paths.clone())?;
    debug!(path = %path, outputs = output_paths.len(), "recorded derivation outputs");

    Ok(Derivation {
      path,
      outputs: output_paths,
    })
  }

  /// Register `path` as a GC root under `name`.
  pub fn add_root(&self, name: &str, path: &StorePath) -> StoreResult<()> {
    let gc = self
      .gc_capability()
      .ok_or_else(|| StoreError::GcUnsupported(self.uri()))?;
    // Held until the root is written so a collection cannot slip in between.
    let _guard = self.registration_shared()?;
    let _lock = self.repo.lock_shared()?;
    if !self.is_valid_path(path)? {
      return Err(StoreError::PathNotValid(path.clone()));
    }
    gc.add_root(name, path)
  }

  /// Run a garbage collection with default cancellation.
  pub fn collect_garbage(&self, options: &GcOptions) -> StoreResult<GcResults> {
    GarbageCollector::new(self).collect(options)
  }
}

fn lookup_valid(repo: &dyn Repository, path: &StorePath) -> StoreResult<PathInfo> {
  repo.lookup(path)?.ok_or_else(|| StoreError::PathNotValid(path.clone()))
}

/// Pending result of [`Store::query_path_info_deferred`].
#[derive(Debug)]
pub struct PathInfoFuture {
  rx: oneshot::Receiver<StoreResult<PathInfo>>,
  uri: String,
}

impl PathInfoFuture {
  /// Block the current thread until the result arrives.
  ///
  /// Must not be called from within an async context.
  pub fn blocking_wait(self) -> StoreResult<PathInfo> {
    let uri = self.uri;
    self
      .rx
      .blocking_recv()
      .unwrap_or_else(|e| Err(StoreError::unavailable(uri, e)))
  }
}

impl Future for PathInfoFuture {
  type Output = StoreResult<PathInfo>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = &mut *self;
    match Pin::new(&mut this.rx).poll(cx) {
      Poll::Ready(Ok(result)) => Poll::Ready(result),
      Poll::Ready(Err(e)) => Poll::Ready(Err(StoreError::unavailable(this.uri.clone(), e))),
      Poll::Pending => Poll::Pending,
    }
  }
}
