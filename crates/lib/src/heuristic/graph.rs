use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use tracing::{debug, info, warn};

use crate::gc::GcOptions;
use crate::graph::{EdgeKind, ReferenceGraph};
use crate::store::{PathInfo, Store, StoreError, StorePath, StoreResult};

use super::fs::StatAgg;
use super::quantity::QuantityUnit;
use super::{Executor, PathStats, Selected, Weights};

#[derive(Debug)]
struct Node {
  path: StorePath,
  nar_size: u64,
  /// Filled in when the node first becomes a candidate.
  stats: Option<StatAgg>,
  inherited_max_atime: i64,
  substitutable: bool,
}

#[derive(Debug, Clone, Copy)]
struct HeapEntry {
  score: f64,
  idx: NodeIndex,
}

impl PartialEq for HeapEntry {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for HeapEntry {
  fn cmp(&self, other: &Self) -> Ordering {
    self.score.total_cmp(&other.score).then(self.idx.cmp(&other.idx))
  }
}

/// Dead paths with their reference edges, consumed from the referrer side.
///
/// Only nodes nothing points at are candidates; removing one may turn the
/// paths it references into candidates.
pub struct GarbageGraph<'a> {
  graph: StableDiGraph<Node, EdgeKind>,
  heap: BinaryHeap<Reverse<HeapEntry>>,
  unit: QuantityUnit,
  weights: Weights,
  inherit_atime: bool,
  stats: &'a dyn PathStats,
  executor: &'a Executor,
  store: &'a Store,
  invalid_paths: BTreeSet<StorePath>,
}

impl<'a> GarbageGraph<'a> {
  pub fn build(
    store: &'a Store,
    unit: QuantityUnit,
    weights: Weights,
    inherit_atime: bool,
    stats: &'a dyn PathStats,
    executor: &'a Executor,
  ) -> StoreResult<Self> {
    let policy = store.policy();
    if policy.keep_outputs && policy.keep_derivations {
      warn!("keep-outputs and keep-derivations are both enabled; reference loops will limit what can be selected");
    }

    info!("querying dead paths");
    let dead = store.collect_garbage(&GcOptions::return_dead())?.paths;

    let mut invalid_paths = BTreeSet::new();
    let mut infos: BTreeMap<StorePath, PathInfo> = BTreeMap::new();
    for path in dead {
      match store.query_path_info(&path) {
        Ok(info) => {
          infos.insert(path, info);
        }
        Err(StoreError::PathNotValid(_)) => {
          invalid_paths.insert(path);
        }
        Err(e) => return Err(e),
      }
    }

    info!(count = infos.len(), "topologically sorting paths");
    let sorted = match ReferenceGraph::from_infos(infos.values()).topo_sort() {
      Ok(sorted) => sorted,
      Err(StoreError::CyclicReference { cycle }) => {
        debug!(cycle = ?cycle, "dead paths contain reference cycles");
        infos.keys().cloned().collect()
      }
      Err(e) => return Err(e),
    };

    let mut graph = StableDiGraph::new();
    let mut index: BTreeMap<StorePath, NodeIndex> = BTreeMap::new();
    for path in sorted.iter().rev() {
      let Some(info) = infos.get(path) else {
        continue;
      };
      let idx = graph.add_node(Node {
        path: path.clone(),
        nar_size: info.nar_size,
        stats: None,
        inherited_max_atime: 0,
        substitutable: false,
      });
      index.insert(path.clone(), idx);
    }

    for (path, info) in &infos {
      let from = index[path];
      for reference in info.foreign_references() {
        // References outside the garbage set are live and irrelevant here.
        if let Some(&to) = index.get(reference) {
          graph.add_edge(from, to, EdgeKind::Reference);
        }
      }
    }

    if policy.keep_outputs || policy.keep_derivations {
      for (path, &drv_idx) in index.iter().filter(|(p, _)| p.is_derivation()) {
        let outputs = match store.query_derivation_outputs(path) {
          Ok(outputs) => outputs,
          Err(StoreError::NotADerivation(_)) => continue,
          Err(e) => return Err(e),
        };
        for output in outputs {
          let Some(&output_idx) = index.get(&output) else {
            continue;
          };
          if policy.keep_derivations {
            graph.add_edge(output_idx, drv_idx, EdgeKind::OutputDrv);
          }
          if policy.keep_outputs {
            graph.add_edge(drv_idx, output_idx, EdgeKind::DrvOutput);
          }
        }
      }
    }

    let mut garbage = Self {
      graph,
      heap: BinaryHeap::new(),
      unit,
      weights,
      inherit_atime,
      stats,
      executor,
      store,
      invalid_paths,
    };

    let pseudo_roots: Vec<NodeIndex> = garbage
      .graph
      .node_indices()
      .filter(|idx| garbage.in_degree(*idx) == 0)
      .collect();
    info!(candidates = pseudo_roots.len(), "constructing heap");
    garbage.push_candidates(pseudo_roots)?;

    Ok(garbage)
  }

  /// Dead paths whose metadata vanished while building the graph.
  pub fn invalid_paths(&self) -> &BTreeSet<StorePath> {
    &self.invalid_paths
  }

  /// Paths still in the graph.
  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  fn in_degree(&self, idx: NodeIndex) -> usize {
    self.graph.neighbors_directed(idx, Direction::Incoming).count()
  }

  /// Gather statistics for new candidates and push them onto the heap.
  fn push_candidates(&mut self, idxs: Vec<NodeIndex>) -> StoreResult<()> {
    if idxs.is_empty() {
      return Ok(());
    }

    if self.weights.substitutable.is_some() {
      let candidates: BTreeSet<StorePath> = idxs.iter().map(|idx| self.graph[*idx].path.clone()).collect();
      let substitutable = self.store.repository().substitutable(&candidates)?;
      for idx in &idxs {
        let node = &mut self.graph[*idx];
        node.substitutable = substitutable.contains(&node.path);
      }
    }

    let pending: Vec<(NodeIndex, StorePath)> = idxs
      .iter()
      .filter(|idx| self.graph[**idx].stats.is_none())
      .map(|idx| (*idx, self.graph[*idx].path.clone()))
      .collect();
    let (stats, executor) = (self.stats, self.executor);
    for (idx, agg) in executor.map(pending, |(idx, path)| (idx, stats.stat(&path))) {
      self.graph[idx].stats = Some(agg);
    }

    for idx in idxs {
      let score = self.score(idx);
      self.heap.push(Reverse(HeapEntry { score, idx }));
    }
    Ok(())
  }

  fn node_stats(&self, idx: NodeIndex) -> StatAgg {
    self.graph[idx].stats.unwrap_or(StatAgg::UNREADABLE)
  }

  fn max_atime(&self, idx: NodeIndex) -> i64 {
    let own = self.node_stats(idx).max_atime;
    if self.inherit_atime {
      own.max(self.graph[idx].inherited_max_atime)
    } else {
      own
    }
  }

  fn limit_measurement(&self, idx: NodeIndex) -> u64 {
    match self.unit {
      QuantityUnit::Bytes => self.graph[idx].nar_size,
      QuantityUnit::Inodes => self.node_stats(idx).inodes,
    }
  }

  /// Lower scores are deleted first.
  fn score(&self, idx: NodeIndex) -> f64 {
    let node = &self.graph[idx];
    let inodes = self.node_stats(idx).inodes as f64;
    let nar_size = node.nar_size as f64;

    let (inodes_score, size_score) = match self.unit {
      QuantityUnit::Bytes => (inodes / (nar_size + 1.0), nar_size),
      QuantityUnit::Inodes => (inodes, nar_size / (inodes + 1.0)),
    };

    let mut score = self.max_atime(idx) as f64;
    if let Some(w) = self.weights.drvs
      && node.path.is_derivation()
    {
      score -= w;
    }
    if let Some(w) = self.weights.substitutable
      && node.substitutable
    {
      score -= w;
    }
    if let Some(w) = self.weights.inodes {
      score -= w * inodes_score;
    }
    if let Some(w) = self.weights.size {
      score -= w * size_score;
    }
    score
  }

  /// Pop the lowest-scoring candidate and promote the paths it referenced.
  fn remove_heap_root(&mut self) -> StoreResult<Option<Selected>> {
    let Some(Reverse(entry)) = self.heap.pop() else {
      return Ok(None);
    };
    let idx = entry.idx;

    let references: BTreeSet<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Outgoing).collect();
    let max_atime = self.max_atime(idx);
    let inodes = self.node_stats(idx).inodes;
    let Some(node) = self.graph.remove_node(idx) else {
      return Ok(None);
    };

    if self.inherit_atime {
      // A path's own atime only matters once its referrers are gone, so
      // this is the one place it needs to propagate.
      for reference in &references {
        let target = &mut self.graph[*reference];
        target.inherited_max_atime = target.inherited_max_atime.max(max_atime);
      }
    }

    let ready: Vec<NodeIndex> = references
      .into_iter()
      .filter(|r| self.in_degree(*r) == 0)
      .collect();
    self.push_candidates(ready)?;

    debug!(path = %node.path, score = entry.score, "selected path");
    Ok(Some(Selected {
      path: node.path,
      nar_size: node.nar_size,
      inodes,
    }))
  }

  /// Re-score the heap root while it would overshoot the remaining limit.
  ///
  /// Corrections only ever raise a score, so once the root's score is up to
  /// date no other entry can undercut it.
  fn correct_heap_root_for_limit_excess(&mut self, weight: f64, limit: u64, removed: u64) {
    let remaining = limit.saturating_sub(removed);

    for _ in 0..self.heap.len() {
      let Some(Reverse(root)) = self.heap.peek().copied() else {
        return;
      };
      let measurement = self.limit_measurement(root.idx);
      if measurement <= remaining {
        return;
      }

      let corrected = self.score(root.idx) + (measurement - remaining) as f64 * weight / limit as f64;
      if root.score == corrected {
        return;
      }

      debug!(
        path = %self.graph[root.idx].path,
        previous = root.score,
        corrected,
        "correcting score for limit excess"
      );
      self.heap.pop();
      self.heap.push(Reverse(HeapEntry {
        score: corrected,
        idx: root.idx,
      }));
    }
  }

  /// Select paths until their combined measurement reaches `limit`.
  pub fn remove_to_limit(&mut self, limit: u64) -> Vec<Selected> {
    let mut selected = Vec::new();
    let mut removed = 0u64;

    while removed < limit {
      if let Some(weight) = self.weights.exceeding_limit {
        self.correct_heap_root_for_limit_excess(weight, limit, removed);
      }

      match self.remove_heap_root() {
        Ok(Some(entry)) => {
          removed += match self.unit {
            QuantityUnit::Bytes => entry.nar_size,
            QuantityUnit::Inodes => entry.inodes,
          };
          selected.push(entry);
        }
        Ok(None) => {
          self.report_exhausted();
          break;
        }
        Err(e) => {
          warn!(error = %e, "stopping selection after store error");
          break;
        }
      }
    }

    selected
  }

  fn report_exhausted(&self) {
    warn!("ran out of zero-reference paths to remove");
    if self.graph.node_count() == 0 {
      return;
    }

    warn!(
      count = self.graph.node_count(),
      "remaining paths may have reference loops; use a full collection to remove them"
    );

    let mut remaining = ReferenceGraph::new();
    for idx in self.graph.node_indices() {
      remaining.add_path(self.graph[idx].path.clone());
    }
    for edge in self.graph.edge_indices() {
      if let Some((from, to)) = self.graph.edge_endpoints(edge) {
        remaining.add_edge(&self.graph[from].path, &self.graph[to].path, self.graph[edge]);
      }
    }
    if let Some(cycle) = remaining.find_cycle() {
      let cycle: Vec<&str> = cycle.iter().map(StorePath::as_str).collect();
      debug!(cycle = ?cycle, "first encountered cycle");
    }
  }
}
