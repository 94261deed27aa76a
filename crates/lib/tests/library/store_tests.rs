//! Store behavior seen from the outside.

use std::collections::BTreeSet;
use std::sync::Arc;

use autotick_lib::consts::NODE_ATTRS_NS;
use autotick_lib::graph::{BuildOutput, GraphBuilder, NodeAttrs, build_order};
use autotick_lib::store::paths::shard_path;
use autotick_lib::store::{DocumentStore, FileBackend, MemoryBackend, StoreBackend};
use tempfile::TempDir;

#[test]
fn identical_rewrite_reaches_no_replica() {
  let temp = TempDir::new().unwrap();
  let replica = Arc::new(MemoryBackend::new());
  let replicas: Vec<Arc<dyn StoreBackend>> = vec![replica.clone()];
  let store = DocumentStore::new(Arc::new(FileBackend::new(temp.path())), replicas, None);
  let mut numpy = NodeAttrs::new("numpy");
  numpy.version = Some("1.0".into());
  store.set(NODE_ATTRS_NS, "numpy", &serde_json::to_value(&numpy).unwrap()).unwrap();
  let writes = replica.writes();

  let mut doc = store.document(NODE_ATTRS_NS, "numpy");
  let (_, written) = doc
    .modify(|attrs: &mut NodeAttrs| {
      attrs.version = Some("1.0".into());
    })
    .unwrap();

  assert!(!written);
  assert_eq!(replica.writes(), writes);
}

#[test]
fn shard_paths_are_stable_and_distinct() {
  let keys: Vec<String> = (0..5000).map(|i| format!("feedstock-{i}")).collect();
  let paths: BTreeSet<String> = keys.iter().map(|k| shard_path(k)).collect();
  assert_eq!(paths.len(), keys.len());
  for key in keys.iter().take(20) {
    assert_eq!(shard_path(key), shard_path(key));
  }
}

#[test]
fn graph_survives_a_store_round_trip() {
  let temp = TempDir::new().unwrap();
  let store = DocumentStore::local(temp.path());
  for (name, host) in [("libfoo", vec![]), ("bar", vec!["libfoo"]), ("baz", vec!["bar", "libfoo"])] {
    let mut attrs = NodeAttrs::new(name);
    for dep in host {
      attrs.requirements.host.insert(dep.to_string());
    }
    attrs.outputs.insert(name.to_string());
    store.set(NODE_ATTRS_NS, name, &serde_json::to_value(&attrs).unwrap()).unwrap();
  }

  let names: Vec<String> = ["libfoo", "bar", "baz"].map(String::from).to_vec();
  let built = GraphBuilder::new(&store).build(&names, None).unwrap();
  built.save(&store).unwrap();
  let loaded = BuildOutput::load(&store).unwrap();

  assert_eq!(loaded.graph.edges(), built.graph.edges());
  assert_eq!(build_order(&loaded.graph), vec!["libfoo", "bar", "baz"]);
}
