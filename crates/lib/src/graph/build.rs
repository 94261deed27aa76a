//! Derive the graph, outputs table and strong-exports set from node documents.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::node::{NodeAttrs, overlay_variants};
use super::outputs::OutputsLut;
use super::{FeedstockGraph, GraphError, GraphFile};
use crate::consts::{GRAPH_KEY, GRAPH_NS, NODE_ATTRS_NS};
use crate::store::{DocumentStore, StoredSet};

/// A recipe could not be rendered. Recorded on the node, never propagated.
#[derive(Debug, Clone, Error)]
#[error("failed to parse recipe of '{node}': {message}")]
pub struct ParseError {
  pub node: String,
  pub message: String,
}

/// Renders a feedstock's recipe, one value per build variant.
pub trait RecipeParser: Send + Sync {
  fn parse(&self, node: &str) -> Result<Vec<Value>, ParseError>;
}

/// Everything a build derives.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
  pub graph: FeedstockGraph,
  pub outputs: OutputsLut,
  pub strong_exports: BTreeSet<String>,
  /// Nodes whose recipe failed to parse during this build.
  pub parse_failures: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoredGraph {
  #[serde(flatten)]
  graph: GraphFile,
  outputs_lut: OutputsLut,
  strong_exports: StoredSet<String>,
}

impl BuildOutput {
  /// Persist to the graph document; returns whether anything changed.
  pub fn save(&self, store: &DocumentStore) -> Result<bool, GraphError> {
    let stored = StoredGraph {
      graph: self.graph.to_file(),
      outputs_lut: self.outputs.clone(),
      strong_exports: self.strong_exports.iter().cloned().collect(),
    };
    let mut doc = store.document(GRAPH_NS, GRAPH_KEY);
    let mut guard = doc.edit()?;
    guard.set_typed(&stored)?;
    Ok(guard.finish()?)
  }

  /// Load the last persisted build; an empty store yields an empty graph.
  pub fn load(store: &DocumentStore) -> Result<Self, GraphError> {
    let stored: StoredGraph = store.document(GRAPH_NS, GRAPH_KEY).read()?;
    Ok(Self {
      graph: FeedstockGraph::from_file(&stored.graph)?,
      outputs: stored.outputs_lut,
      strong_exports: stored.strong_exports.0,
      parse_failures: Vec::new(),
    })
  }
}

pub struct GraphBuilder<'a> {
  store: &'a DocumentStore,
  parser: Option<&'a dyn RecipeParser>,
}

impl<'a> GraphBuilder<'a> {
  /// Without a parser, nodes are rebuilt from the variants already on their documents.
  pub fn new(store: &'a DocumentStore) -> Self {
    Self { store, parser: None }
  }

  pub fn with_parser(mut self, parser: &'a dyn RecipeParser) -> Self {
    self.parser = Some(parser);
    self
  }

  /// Refresh the documents of `names`, then rederive the whole graph.
  ///
  /// Feedstocks of `existing` that are not in `names` keep their documents as-is but
  /// still contribute outputs and edges.
  pub fn build(&self, names: &[String], existing: Option<&FeedstockGraph>) -> Result<BuildOutput, GraphError> {
    let mut all: BTreeSet<String> = names.iter().cloned().collect();
    if let Some(existing) = existing {
      all.extend(existing.feedstocks().map(str::to_string));
    }

    let mut parse_failures = Vec::new();
    for name in names {
      if !self.refresh_node(name)? {
        parse_failures.push(name.clone());
      }
    }

    let mut nodes = Vec::with_capacity(all.len());
    for name in &all {
      let attrs: NodeAttrs = self.store.document(NODE_ATTRS_NS, name).read()?;
      nodes.push((name.clone(), attrs));
    }

    let mut outputs = OutputsLut::new();
    for (name, attrs) in &nodes {
      for output in &attrs.outputs {
        outputs.insert(output, name);
      }
    }

    let mut graph = FeedstockGraph::new();
    for (name, _) in &nodes {
      graph.add_feedstock(name);
    }

    let mut strong_exports = BTreeSet::new();
    let mut synthetic = 0usize;
    for (name, attrs) in &nodes {
      if attrs.strong_exports {
        strong_exports.insert(name.clone());
      }
      for requirement in attrs.requirements.all() {
        let producer = outputs.producer(requirement).unwrap_or(requirement);
        if !graph.contains(producer) {
          synthetic += 1;
        }
        graph.add_edge(producer, name);
      }
    }

    info!(
      nodes = graph.node_count(),
      edges = graph.edge_count(),
      synthetic,
      parse_failures = parse_failures.len(),
      "built dependency graph"
    );

    Ok(BuildOutput {
      graph,
      outputs,
      strong_exports,
      parse_failures,
    })
  }

  /// Re-render one node's document. Returns `false` when parsing failed.
  fn refresh_node(&self, name: &str) -> Result<bool, GraphError> {
    let parsed = match self.parser {
      Some(parser) => Some(parser.parse(name)),
      None => None,
    };

    let mut doc = self.store.document(NODE_ATTRS_NS, name);
    let (ok, written) = doc.modify(|attrs: &mut NodeAttrs| {
      attrs.name = name.to_string();
      match parsed {
        Some(Err(e)) => {
          warn!(node = %name, error = %e, "recipe parse failed");
          attrs.parse_error = Some(e.message);
          return false;
        }
        Some(Ok(variants)) => attrs.meta_variants = variants,
        None => {}
      }
      attrs.parse_error = None;
      if !attrs.meta_variants.is_empty() {
        let recipe = overlay_variants(&attrs.meta_variants);
        attrs.apply_recipe(&recipe);
      }
      true
    })?;
    debug!(node = %name, written, "refreshed node attributes");
    Ok(ok)
  }
}
