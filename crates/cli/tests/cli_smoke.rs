//! CLI smoke tests for tick.
//!
//! Every command runs against a temporary store selected through the environment.

use std::collections::BTreeSet;
use std::path::Path;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

use autotick_lib::consts::NODE_ATTRS_NS;
use autotick_lib::graph::NodeAttrs;
use autotick_lib::store::{DocumentStore, StoredSet};

/// A tick command pointed at the store and snapshot dirs under `temp`.
fn tick_cmd(temp: &TempDir) -> Command {
  let mut cmd = cargo_bin_cmd!("tick");
  cmd
    .env("TICK_STORE_ROOT", temp.path().join("store"))
    .env("TICK_SNAPSHOT_DIR", temp.path().join("snapshots"))
    .env_remove("TICK_STORE_BACKENDS")
    .env_remove("RUST_LOG");
  cmd
}

fn node(name: &str, host: &[&str], new_version: Option<&str>) -> NodeAttrs {
  let mut attrs = NodeAttrs::new(name);
  attrs.outputs = StoredSet(BTreeSet::from([name.to_string()]));
  attrs.requirements.host = StoredSet(host.iter().map(|s| s.to_string()).collect());
  attrs.version = Some("1.0.0".into());
  attrs.new_version = new_version.map(str::to_string);
  attrs
}

/// libfoo <- bar <- baz, with bar and baz behind upstream.
fn seed_chain(root: &Path) {
  let store = DocumentStore::local(root);
  for attrs in [
    node("libfoo", &[], None),
    node("bar", &["libfoo"], Some("1.1.0")),
    node("baz", &["bar"], Some("2.0.0")),
  ] {
    store
      .set(NODE_ATTRS_NS, &attrs.name, &serde_json::to_value(&attrs).unwrap())
      .unwrap();
  }
}

#[test]
fn help_lists_commands() {
  let temp = TempDir::new().unwrap();
  tick_cmd(&temp)
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("snapshot"))
    .stdout(predicate::str::contains("deploy"));
}

#[test]
fn version_flag() {
  let temp = TempDir::new().unwrap();
  tick_cmd(&temp)
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("tick"));
}

#[test]
fn info_reports_environment_overrides() {
  let temp = TempDir::new().unwrap();
  let output = tick_cmd(&temp).args(["info", "-o", "json"]).output().unwrap();
  assert!(output.status.success());
  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["store"]["root"], temp.path().join("store").display().to_string());
  assert_eq!(json["store"]["backends"], serde_json::json!(["file"]));
}

#[test]
fn bad_environment_value_fails() {
  let temp = TempDir::new().unwrap();
  tick_cmd(&temp)
    .env("TICK_PARALLELISM", "many")
    .arg("info")
    .assert()
    .failure()
    .stderr(predicate::str::contains("TICK_PARALLELISM"));
}

#[test]
fn store_get_missing_document_fails() {
  let temp = TempDir::new().unwrap();
  tick_cmd(&temp)
    .args(["store", "get", "node_attrs", "nope"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("No document node_attrs/nope"));
}

#[test]
fn store_list_and_get() {
  let temp = TempDir::new().unwrap();
  seed_chain(&temp.path().join("store"));

  let output = tick_cmd(&temp)
    .args(["store", "list", "node_attrs", "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());
  let keys: Vec<String> = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(keys, vec!["bar", "baz", "libfoo"]);

  tick_cmd(&temp)
    .args(["store", "get", "node_attrs", "baz"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"new_version\": \"2.0.0\""));
}

#[test]
fn graph_build_then_order() {
  let temp = TempDir::new().unwrap();
  seed_chain(&temp.path().join("store"));

  let output = tick_cmd(&temp).args(["graph", "build", "-o", "json"]).output().unwrap();
  assert!(output.status.success());
  let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(summary["feedstocks"], 3);
  assert_eq!(summary["edges"], 2);
  assert_eq!(summary["changed"], true);

  let output = tick_cmd(&temp).args(["order", "-o", "json"]).output().unwrap();
  let order: Vec<String> = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(order, vec!["libfoo", "bar", "baz"]);

  let spec = temp.path().join("version.json");
  std::fs::write(&spec, r#"{"class": "version", "name": "version"}"#).unwrap();
  let output = tick_cmd(&temp)
    .args(["order", "-o", "json"])
    .arg(&spec)
    .output()
    .unwrap();
  assert!(output.status.success());
  let order: Vec<String> = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(order, vec!["bar", "baz"]);

  // Unchanged inputs leave the graph document alone.
  let output = tick_cmd(&temp).args(["graph", "build", "-o", "json"]).output().unwrap();
  let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(summary["changed"], false);
}

#[test]
fn order_rejects_unknown_migration_class() {
  let temp = TempDir::new().unwrap();
  let spec = temp.path().join("bogus.json");
  std::fs::write(&spec, r#"{"class": "teleport", "name": "x"}"#).unwrap();
  tick_cmd(&temp).arg("order").arg(&spec).assert().failure();
}

#[test]
fn snapshot_take_list_restore() {
  let temp = TempDir::new().unwrap();
  let root = temp.path().join("store");
  seed_chain(&root);

  let output = tick_cmd(&temp).args(["snapshot", "take", "-o", "json"]).output().unwrap();
  assert!(output.status.success());
  let meta: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(meta["document_count"], 3);
  let id = meta["id"].as_str().unwrap().to_string();

  tick_cmd(&temp)
    .args(["snapshot", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains(&id));

  let store = DocumentStore::local(&root);
  store.delete(NODE_ATTRS_NS, &["baz"]).unwrap();
  assert!(!store.exists(NODE_ATTRS_NS, "baz").unwrap());

  tick_cmd(&temp)
    .args(["snapshot", "restore", &id, "--force"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Restored 3 document(s)"));
  assert!(store.exists(NODE_ATTRS_NS, "baz").unwrap());
}

#[test]
fn snapshot_restore_needs_force_without_terminal() {
  let temp = TempDir::new().unwrap();
  tick_cmd(&temp)
    .args(["snapshot", "restore", "whatever"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--force"));
}

#[test]
fn snapshot_prune_with_nothing_to_prune() {
  let temp = TempDir::new().unwrap();
  tick_cmd(&temp)
    .args(["snapshot", "prune", "--dry-run"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to prune"));
}

#[test]
fn deploy_outside_a_repository_fails() {
  let temp = TempDir::new().unwrap();
  std::fs::create_dir_all(temp.path().join("store")).unwrap();
  tick_cmd(&temp)
    .env("GIT_CEILING_DIRECTORIES", temp.path())
    .arg("deploy")
    .assert()
    .failure();
}
