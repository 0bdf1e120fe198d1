//! Reference graph over store paths.
//!
//! Edges point from a referrer to the path it references, so "dependencies
//! first" means a node is emitted only after everything it points at. Extra
//! edge kinds model the keep-outputs / keep-derivations policies for liveness.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::store::{PathInfo, StoreError, StorePath};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
  /// The source lists the target in its references.
  Reference,
  /// A derivation keeps one of its outputs alive.
  DrvOutput,
  /// An output keeps its deriving derivation alive.
  OutputDrv,
}

/// Directed graph of store paths.
#[derive(Debug, Default, Clone)]
pub struct ReferenceGraph {
  graph: DiGraph<StorePath, EdgeKind>,
  nodes: BTreeMap<StorePath, NodeIndex>,
}

impl ReferenceGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build the graph induced by `infos`.
  ///
  /// References to paths outside `infos` are dropped, as are self-references.
  pub fn from_infos<'a>(infos: impl IntoIterator<Item = &'a PathInfo>) -> Self {
    let infos: Vec<&PathInfo> = infos.into_iter().collect();
    let mut graph = Self::new();

    for info in &infos {
      graph.add_path(info.path.clone());
    }
    for info in &infos {
      for reference in info.foreign_references() {
        graph.add_edge(&info.path, reference, EdgeKind::Reference);
      }
    }

    graph
  }

  pub fn add_path(&mut self, path: StorePath) -> NodeIndex {
    if let Some(&idx) = self.nodes.get(&path) {
      return idx;
    }
    let idx = self.graph.add_node(path.clone());
    self.nodes.insert(path, idx);
    idx
  }

  /// Add an edge between two known paths. Returns `false` if either endpoint
  /// is missing or the edge would be a self-loop.
  pub fn add_edge(&mut self, from: &StorePath, to: &StorePath, kind: EdgeKind) -> bool {
    if from == to {
      return false;
    }
    let (Some(&a), Some(&b)) = (self.nodes.get(from), self.nodes.get(to)) else {
      return false;
    };

    let exists = self.graph.edges_connecting(a, b).any(|e| *e.weight() == kind);
    if !exists {
      self.graph.add_edge(a, b, kind);
    }
    true
  }

  pub fn contains(&self, path: &StorePath) -> bool {
    self.nodes.contains_key(path)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// All paths in sorted order.
  pub fn paths(&self) -> impl Iterator<Item = &StorePath> {
    self.nodes.keys()
  }

  /// Direct references of `path` (outgoing reference edges).
  pub fn references(&self, path: &StorePath) -> BTreeSet<StorePath> {
    self.neighbors(path, Direction::Outgoing)
  }

  /// Direct referrers of `path` (incoming reference edges).
  pub fn referrers(&self, path: &StorePath) -> BTreeSet<StorePath> {
    self.neighbors(path, Direction::Incoming)
  }

  fn neighbors(&self, path: &StorePath, direction: Direction) -> BTreeSet<StorePath> {
    let Some(&idx) = self.nodes.get(path) else {
      return BTreeSet::new();
    };

    self
      .graph
      .edges_directed(idx, direction)
      .filter(|e| *e.weight() == EdgeKind::Reference)
      .map(|e| {
        let other = match direction {
          Direction::Outgoing => e.target(),
          Direction::Incoming => e.source(),
        };
        self.graph[other].clone()
      })
      .collect()
  }

  /// Everything reachable from `roots` following edges of the given kinds.
  ///
  /// Roots that are not in the graph contribute nothing.
  pub fn closure<'a>(&self, roots: impl IntoIterator<Item = &'a StorePath>, kinds: &[EdgeKind]) -> BTreeSet<StorePath> {
    let mut seen = vec![false; self.graph.node_count()];
    let mut queue = VecDeque::new();

    for root in roots {
      if let Some(&idx) = self.nodes.get(root)
        && !seen[idx.index()]
      {
        seen[idx.index()] = true;
        queue.push_back(idx);
      }
    }

    while let Some(idx) = queue.pop_front() {
      for edge in self.graph.edges_directed(idx, Direction::Outgoing) {
        let next = edge.target();
        if kinds.contains(edge.weight()) && !seen[next.index()] {
          seen[next.index()] = true;
          queue.push_back(next);
        }
      }
    }

    self
      .graph
      .node_indices()
      .filter(|idx| seen[idx.index()])
      .map(|idx| self.graph[idx].clone())
      .collect()
  }

  /// Copy of the graph restricted to `keep`, with only edges of the given kinds.
  pub fn subgraph(&self, keep: &BTreeSet<StorePath>, kinds: &[EdgeKind]) -> Self {
    let mut sub = Self::new();
    for path in keep.iter().filter(|p| self.contains(p)) {
      sub.add_path(path.clone());
    }

    for edge in self.graph.edge_references() {
      if !kinds.contains(edge.weight()) {
        continue;
      }
      let from = &self.graph[edge.source()];
      let to = &self.graph[edge.target()];
      if sub.contains(from) && sub.contains(to) {
        sub.add_edge(from, to, *edge.weight());
      }
    }

    sub
  }

  /// One cycle in the graph, if any, starting at its smallest member.
  ///
  /// The returned path lists each node once; the last node has an edge back
  /// to the first.
  pub fn find_cycle(&self) -> Option<Vec<StorePath>> {
    let component = tarjan_scc(&self.graph)
      .into_iter()
      .filter(|scc| scc.len() > 1)
      .min_by(|a, b| self.min_member(a).cmp(&self.min_member(b)))?;

    let members: BTreeSet<NodeIndex> = component.iter().copied().collect();
    let start = component
      .iter()
      .copied()
      .min_by(|a, b| self.graph[*a].cmp(&self.graph[*b]))?;

    // Shortest walk back to `start` within the component.
    let mut parent: BTreeMap<NodeIndex, NodeIndex> = BTreeMap::new();
    let mut queue = VecDeque::from([start]);
    while let Some(idx) = queue.pop_front() {
      let mut successors: Vec<NodeIndex> = self
        .graph
        .neighbors_directed(idx, Direction::Outgoing)
        .filter(|n| members.contains(n))
        .collect();
      successors.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
      successors.dedup();

      for next in successors {
        if next == start {
          let mut cycle = vec![self.graph[idx].clone()];
          let mut cursor = idx;
          while let Some(&prev) = parent.get(&cursor) {
            cycle.push(self.graph[prev].clone());
            cursor = prev;
          }
          cycle.reverse();
          return Some(cycle);
        }
        if !parent.contains_key(&next) {
          parent.insert(next, idx);
          queue.push_back(next);
        }
      }
    }

    None
  }

  fn min_member(&self, scc: &[NodeIndex]) -> Option<&StorePath> {
    scc.iter().map(|idx| &self.graph[*idx]).min()
  }

  /// Paths ordered so that every path comes after everything it references.
  ///
  /// Ties are broken by path ordering. Fails with the witness cycle if the
  /// graph is not acyclic.
  pub fn topo_sort(&self) -> Result<Vec<StorePath>, StoreError> {
    let mut pending: Vec<usize> = self
      .graph
      .node_indices()
      .map(|idx| self.graph.neighbors_directed(idx, Direction::Outgoing).count())
      .collect();

    let mut ready: BTreeSet<(&StorePath, NodeIndex)> = self
      .graph
      .node_indices()
      .filter(|idx| pending[idx.index()] == 0)
      .map(|idx| (&self.graph[idx], idx))
      .collect();

    let mut sorted = Vec::with_capacity(self.graph.node_count());
    while let Some((path, idx)) = ready.pop_first() {
      sorted.push(path.clone());
      for referrer in self.graph.neighbors_directed(idx, Direction::Incoming) {
        let count = &mut pending[referrer.index()];
        *count -= 1;
        if *count == 0 {
          ready.insert((&self.graph[referrer], referrer));
        }
      }
    }

    if sorted.len() != self.graph.node_count() {
      let cycle = self.find_cycle().unwrap_or_default();
      return Err(StoreError::CyclicReference { cycle });
    }

    Ok(sorted)
  }

  /// Order in which paths can be deleted: referrers before the paths they
  /// reference. Members of a cycle are emitted together in path order.
  pub fn deletion_order(&self) -> Vec<StorePath> {
    // tarjan_scc yields components references-first.
    let mut components = tarjan_scc(&self.graph);
    components.reverse();

    let mut order = Vec::with_capacity(self.graph.node_count());
    for component in components {
      let mut members: Vec<&StorePath> = component.iter().map(|idx| &self.graph[*idx]).collect();
      members.sort();
      order.extend(members.into_iter().cloned());
    }
    order
  }
}
