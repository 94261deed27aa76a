//! Shared fixtures for library integration tests.

use std::sync::Arc;

use autotick_lib::consts::NODE_ATTRS_NS;
use autotick_lib::forge::RetryPolicy;
use autotick_lib::graph::{FeedstockGraph, NodeAttrs};
use autotick_lib::locks::Locks;
use autotick_lib::schedule::{ScheduleConfig, Scheduler};
use autotick_lib::store::DocumentStore;
use autotick_lib::testing::{MemoryForge, MemoryWorkspace, StaticRunner};
use tempfile::TempDir;

/// A file-backed store with in-memory collaborators.
pub struct Harness {
  pub temp: TempDir,
  pub store: DocumentStore,
  pub forge: Arc<MemoryForge>,
  pub workspace: Arc<MemoryWorkspace>,
}

impl Harness {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let store = DocumentStore::local(temp.path().join("store"));
    Self {
      temp,
      store,
      forge: Arc::new(MemoryForge::new()),
      workspace: Arc::new(MemoryWorkspace::new()),
    }
  }

  pub fn scheduler(&self) -> Scheduler {
    Scheduler::new(
      self.store.clone(),
      self.forge.clone(),
      Arc::new(StaticRunner::changed()),
      self.workspace.clone(),
      Locks::new(),
      ScheduleConfig {
        parallelism: 4,
        api_reserve: 10,
        ..ScheduleConfig::default()
      },
    )
    .with_retry(RetryPolicy::immediate(3))
  }

  pub fn put(&self, attrs: &NodeAttrs) {
    self
      .store
      .set(NODE_ATTRS_NS, &attrs.name, &serde_json::to_value(attrs).unwrap())
      .unwrap();
  }

  pub fn attrs(&self, name: &str) -> NodeAttrs {
    self.store.document(NODE_ATTRS_NS, name).read().unwrap()
  }
}

/// A node whose upstream moved from 2.0.0 to `new_version`.
pub fn outdated(name: &str, new_version: &str) -> NodeAttrs {
  let mut attrs = NodeAttrs::new(name);
  attrs.version = Some("2.0.0".into());
  attrs.new_version = Some(new_version.into());
  attrs
}

/// A graph of unconnected feedstocks.
pub fn flat_graph(names: &[&str]) -> FeedstockGraph {
  let mut graph = FeedstockGraph::new();
  for name in names {
    graph.add_feedstock(name);
  }
  graph
}
