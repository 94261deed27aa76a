//! The part of the graph a migration still has work in.

use std::collections::{BTreeSet, HashMap, VecDeque};

use tracing::debug;

use super::{Migration, MigrationError};
use crate::consts::NODE_ATTRS_NS;
use crate::graph::{FeedstockGraph, NodeAttrs};
use crate::store::DocumentStore;

/// A migration's effective subgraph and the nodes in it the migration applies to.
#[derive(Debug, Clone, Default)]
pub struct Effective {
  pub graph: FeedstockGraph,
  pub applicable: BTreeSet<String>,
}

/// Prune nodes failing `applies` that are leaves, repeating until nothing changes, then
/// drop self-loops.
///
/// Non-applicable nodes with applicable dependents stay, so dependency order through
/// them is preserved. A node's own self-loop does not count as a dependent.
pub fn effective_graph(graph: &FeedstockGraph, applies: impl Fn(&str) -> bool) -> FeedstockGraph {
  let mut keep: BTreeSet<String> = graph.nodes().map(str::to_string).collect();
  let mut out_degree: HashMap<&str, usize> = graph
    .nodes()
    .map(|n| (n, graph.successors(n).into_iter().filter(|s| *s != n).count()))
    .collect();

  let mut queue: VecDeque<&str> = graph
    .nodes()
    .filter(|n| out_degree.get(n) == Some(&0) && !applies(n))
    .collect();

  while let Some(node) = queue.pop_front() {
    if !keep.remove(node) {
      continue;
    }
    for pred in graph.predecessors(node) {
      if pred == node || !keep.contains(pred) {
        continue;
      }
      if let Some(degree) = out_degree.get_mut(pred) {
        *degree = degree.saturating_sub(1);
        if *degree == 0 && !applies(pred) {
          queue.push_back(pred);
        }
      }
    }
  }

  graph.subgraph(&keep, true)
}

impl Migration {
  /// Evaluate the predicate on every feedstock, then prune.
  pub fn effective(&self, graph: &FeedstockGraph, store: &DocumentStore) -> Result<Effective, MigrationError> {
    let mut applicable = BTreeSet::new();
    for name in graph.feedstocks() {
      let mut doc = match graph.payload(name) {
        Some(doc_ref) => store.resolve(doc_ref)?,
        None => store.document(NODE_ATTRS_NS, name),
      };
      let attrs: NodeAttrs = doc.read()?;
      if self.applies(&attrs) {
        applicable.insert(name.to_string());
      }
    }
    let pruned = effective_graph(graph, |n| applicable.contains(n));
    debug!(
      migration = %self.name(),
      applicable = applicable.len(),
      nodes = pruned.node_count(),
      "computed effective graph"
    );
    Ok(Effective {
      graph: pruned,
      applicable,
    })
  }
}
