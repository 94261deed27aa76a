//! The feedstock dependency graph.
//!
//! Edges point from the node that outputs a package to every node requiring it. The
//! graph is not guaranteed to be acyclic; [`order::build_order`] tolerates cycles.

pub mod build;
pub mod node;
pub mod order;
pub mod outputs;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::NODE_ATTRS_NS;
use crate::store::{DocRef, StoreError};

pub use build::{BuildOutput, GraphBuilder, ParseError, RecipeParser};
pub use node::{AttemptRecord, BotError, NodeAttrs, Requirements};
pub use order::build_order;
pub use outputs::OutputsLut;

#[derive(Debug, Error)]
pub enum GraphError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("unknown node '{0}'")]
  UnknownNode(String),

  #[error("graph edge references unknown node '{0}'")]
  DanglingEdge(String),
}

/// Directed graph of feedstocks and dependency-only package names.
///
/// Feedstock nodes carry a reference to their attribute document; synthetic nodes
/// created for unresolved requirement names carry none.
#[derive(Debug, Clone, Default)]
pub struct FeedstockGraph {
  graph: DiGraph<String, ()>,
  index: HashMap<String, NodeIndex>,
  payloads: BTreeMap<String, Option<DocRef>>,
}

impl FeedstockGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a feedstock node whose attributes live in the node namespace.
  pub fn add_feedstock(&mut self, name: &str) -> NodeIndex {
    let idx = self.ensure_node(name);
    self.payloads.insert(name.to_string(), Some(DocRef::new(NODE_ATTRS_NS, name)));
    idx
  }

  /// Add a node without attributes unless the name is already present.
  pub fn ensure_node(&mut self, name: &str) -> NodeIndex {
    if let Some(&idx) = self.index.get(name) {
      return idx;
    }
    let idx = self.graph.add_node(name.to_string());
    self.index.insert(name.to_string(), idx);
    self.payloads.insert(name.to_string(), None);
    idx
  }

  /// Add `from -> to`, creating missing endpoints as synthetic nodes. Parallel edges collapse.
  pub fn add_edge(&mut self, from: &str, to: &str) {
    let a = self.ensure_node(from);
    let b = self.ensure_node(to);
    self.graph.update_edge(a, b, ());
  }

  pub fn contains(&self, name: &str) -> bool {
    self.index.contains_key(name)
  }

  /// Whether `name` is a feedstock rather than a dependency-only package name.
  pub fn is_feedstock(&self, name: &str) -> bool {
    matches!(self.payloads.get(name), Some(Some(_)))
  }

  pub fn payload(&self, name: &str) -> Option<&DocRef> {
    self.payloads.get(name).and_then(Option::as_ref)
  }

  pub fn node_count(&self) -> usize {
    self.graph.node_count()
  }

  pub fn edge_count(&self) -> usize {
    self.graph.edge_count()
  }

  /// Node names in sorted order.
  pub fn nodes(&self) -> impl Iterator<Item = &str> {
    self.payloads.keys().map(String::as_str)
  }

  pub fn feedstocks(&self) -> impl Iterator<Item = &str> {
    self.payloads.iter().filter(|(_, p)| p.is_some()).map(|(n, _)| n.as_str())
  }

  pub fn has_edge(&self, from: &str, to: &str) -> bool {
    match (self.index.get(from), self.index.get(to)) {
      (Some(&a), Some(&b)) => self.graph.contains_edge(a, b),
      _ => false,
    }
  }

  /// Dependents of `name`, sorted.
  pub fn successors(&self, name: &str) -> Vec<&str> {
    self.neighbors(name, Direction::Outgoing)
  }

  /// Dependencies of `name`, sorted.
  pub fn predecessors(&self, name: &str) -> Vec<&str> {
    self.neighbors(name, Direction::Incoming)
  }

  fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
    let Some(&idx) = self.index.get(name) else {
      return Vec::new();
    };
    let mut out: Vec<&str> = self
      .graph
      .neighbors_directed(idx, direction)
      .map(|n| self.graph[n].as_str())
      .collect();
    out.sort_unstable();
    out.dedup();
    out
  }

  /// Nodes without incoming edges, sorted.
  pub fn sources(&self) -> Vec<&str> {
    self
      .nodes()
      .filter(|n| {
        self.index.get(*n).is_some_and(|&idx| {
          self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .next()
            .is_none()
        })
      })
      .collect()
  }

  /// Edges as sorted `(from, to)` pairs.
  pub fn edges(&self) -> Vec<(&str, &str)> {
    let mut out: Vec<(&str, &str)> = self
      .graph
      .edge_indices()
      .filter_map(|e| self.graph.edge_endpoints(e))
      .map(|(a, b)| (self.graph[a].as_str(), self.graph[b].as_str()))
      .collect();
    out.sort_unstable();
    out
  }

  /// The subgraph induced by `keep`, optionally without self-loops.
  pub fn subgraph(&self, keep: &BTreeSet<String>, drop_self_loops: bool) -> FeedstockGraph {
    let mut sub = FeedstockGraph::new();
    for name in keep {
      match self.payloads.get(name) {
        Some(Some(_)) => {
          sub.add_feedstock(name);
        }
        Some(None) => {
          sub.ensure_node(name);
        }
        None => {}
      }
    }
    for (from, to) in self.edges() {
      if drop_self_loops && from == to {
        continue;
      }
      if keep.contains(from) && keep.contains(to) {
        sub.add_edge(from, to);
      }
    }
    sub
  }

  pub fn to_file(&self) -> GraphFile {
    GraphFile {
      nodes: self.payloads.clone(),
      edges: self
        .edges()
        .into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect(),
    }
  }

  pub fn from_file(file: &GraphFile) -> Result<Self, GraphError> {
    let mut graph = FeedstockGraph::new();
    for (name, payload) in &file.nodes {
      match payload {
        Some(_) => graph.add_feedstock(name),
        None => graph.ensure_node(name),
      };
    }
    for (from, to) in &file.edges {
      for end in [from, to] {
        if !graph.contains(end) {
          return Err(GraphError::DanglingEdge(end.clone()));
        }
      }
      graph.add_edge(from, to);
    }
    Ok(graph)
  }
}

/// Persisted form of a [`FeedstockGraph`]: node payload references and a sorted edge list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphFile {
  pub nodes: BTreeMap<String, Option<DocRef>>,
  pub edges: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> FeedstockGraph {
    let mut g = FeedstockGraph::new();
    g.add_feedstock("python");
    g.add_feedstock("numpy");
    g.add_feedstock("scipy");
    g.add_edge("python", "numpy");
    g.add_edge("numpy", "scipy");
    g.add_edge("python", "scipy");
    g
  }

  #[test]
  fn neighbors_are_sorted() {
    let g = sample();
    assert_eq!(g.successors("python"), vec!["numpy", "scipy"]);
    assert_eq!(g.predecessors("scipy"), vec!["numpy", "python"]);
    assert_eq!(g.sources(), vec!["python"]);
  }

  #[test]
  fn parallel_edges_collapse() {
    let mut g = sample();
    g.add_edge("python", "numpy");
    assert_eq!(g.edge_count(), 3);
  }

  #[test]
  fn synthetic_nodes_have_no_payload() {
    let mut g = sample();
    g.add_edge("libblas", "numpy");
    assert!(g.contains("libblas"));
    assert!(!g.is_feedstock("libblas"));
    assert!(g.is_feedstock("numpy"));
    assert_eq!(g.payload("numpy"), Some(&DocRef::new(NODE_ATTRS_NS, "numpy")));
    assert_eq!(g.feedstocks().collect::<Vec<_>>(), vec!["numpy", "python", "scipy"]);
  }

  #[test]
  fn subgraph_drops_self_loops_and_outside_edges() {
    let mut g = sample();
    g.add_edge("scipy", "scipy");
    let keep: BTreeSet<String> = ["numpy", "scipy"].iter().map(|s| s.to_string()).collect();
    let sub = g.subgraph(&keep, true);
    assert_eq!(sub.node_count(), 2);
    assert_eq!(sub.edges(), vec![("numpy", "scipy")]);
  }

  #[test]
  fn file_form_restores_the_graph() {
    let mut g = sample();
    g.add_edge("libblas", "numpy");
    let file = g.to_file();
    let back = FeedstockGraph::from_file(&file).unwrap();
    assert_eq!(back.edges(), g.edges());
    assert_eq!(back.to_file(), file);
    assert!(!back.is_feedstock("libblas"));
  }

  #[test]
  fn dangling_edges_are_rejected() {
    let file = GraphFile {
      nodes: BTreeMap::new(),
      edges: vec![("a".into(), "b".into())],
    };
    assert!(matches!(
      FeedstockGraph::from_file(&file),
      Err(GraphError::DanglingEdge(name)) if name == "a"
    ));
  }
}
