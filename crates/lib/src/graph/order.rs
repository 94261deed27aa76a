//! Best-effort topological order over a graph that may contain cycles.

use std::collections::HashSet;

use super::FeedstockGraph;

/// Dependencies before dependents, every node exactly once.
///
/// Depth-first post-order from the sorted sources, reversed. Nodes reachable from no
/// source (those only on cycles) are started afterwards in sorted order. Each node is
/// marked visited when first entered, so a back edge is simply ignored.
pub fn build_order(graph: &FeedstockGraph) -> Vec<String> {
  let mut visited: HashSet<&str> = HashSet::with_capacity(graph.node_count());
  let mut post: Vec<&str> = Vec::with_capacity(graph.node_count());

  let starts = graph.sources().into_iter().chain(graph.nodes());
  for start in starts {
    visit(graph, start, &mut visited, &mut post);
  }

  post.into_iter().rev().map(str::to_string).collect()
}

fn visit<'g>(graph: &'g FeedstockGraph, start: &'g str, visited: &mut HashSet<&'g str>, post: &mut Vec<&'g str>) {
  if !visited.insert(start) {
    return;
  }
  // (node, its successors, index of the next successor to try)
  let mut stack: Vec<(&str, Vec<&str>, usize)> = vec![(start, graph.successors(start), 0)];
  while let Some((node, succ, next)) = stack.last_mut() {
    if let Some(&child) = succ.get(*next) {
      *next += 1;
      if visited.insert(child) {
        stack.push((child, graph.successors(child), 0));
      }
    } else {
      post.push(*node);
      stack.pop();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn graph(edges: &[(&str, &str)]) -> FeedstockGraph {
    let mut g = FeedstockGraph::new();
    for (a, b) in edges {
      g.add_edge(a, b);
    }
    g
  }

  fn position(order: &[String], name: &str) -> usize {
    order.iter().position(|n| n == name).unwrap()
  }

  #[test]
  fn dependencies_come_first() {
    let g = graph(&[("python", "numpy"), ("numpy", "scipy"), ("python", "scipy"), ("scipy", "sklearn")]);
    let order = build_order(&g);
    assert_eq!(order.len(), 4);
    assert!(position(&order, "python") < position(&order, "numpy"));
    assert!(position(&order, "numpy") < position(&order, "scipy"));
    assert!(position(&order, "scipy") < position(&order, "sklearn"));
  }

  #[test]
  fn cycles_terminate_with_each_node_once() {
    let g = graph(&[("a", "b"), ("b", "c"), ("c", "a"), ("c", "d"), ("root", "a")]);
    let order = build_order(&g);
    let mut sorted = order.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), order.len());
    assert_eq!(order.len(), 5);
    assert_eq!(order[0], "root");
  }

  #[test]
  fn pure_cycle_without_sources_is_still_ordered() {
    let g = graph(&[("x", "y"), ("y", "x")]);
    let order = build_order(&g);
    assert_eq!(order, vec!["x".to_string(), "y".to_string()]);
  }

  #[test]
  fn self_loops_are_harmless() {
    let g = graph(&[("a", "a"), ("a", "b")]);
    assert_eq!(build_order(&g), vec!["a".to_string(), "b".to_string()]);
  }

  #[test]
  fn deterministic() {
    let g = graph(&[("b", "c"), ("a", "c"), ("c", "d")]);
    assert_eq!(build_order(&g), build_order(&g));
  }

  #[test]
  fn long_chain_does_not_overflow() {
    let mut g = FeedstockGraph::new();
    for i in 0..50_000 {
      g.add_edge(&format!("n{i:05}"), &format!("n{:05}", i + 1));
    }
    let order = build_order(&g);
    assert_eq!(order.len(), 50_001);
    assert_eq!(order[0], "n00000");
  }
}
