//! A writable in-memory layer over a store that is only ever read.
//!
//! Rehearsal runs use it so every write lands in memory while reads still see the
//! real documents underneath.

use std::collections::BTreeSet;

use parking_lot::RwLock;

use super::DocumentStore;
use super::backend::{StoreBackend, StoreError};
use super::memory::MemoryBackend;

#[derive(Debug)]
pub struct OverlayBackend {
  base: DocumentStore,
  changes: MemoryBackend,
  deleted: RwLock<BTreeSet<(String, String)>>,
}

impl OverlayBackend {
  pub fn new(base: DocumentStore) -> Self {
    Self {
      base,
      changes: MemoryBackend::new(),
      deleted: RwLock::new(BTreeSet::new()),
    }
  }

  /// Documents written through the overlay.
  pub fn writes(&self) -> usize {
    self.changes.writes()
  }

  fn is_deleted(&self, ns: &str, key: &str) -> bool {
    self.deleted.read().contains(&(ns.to_string(), key.to_string()))
  }
}

impl StoreBackend for OverlayBackend {
  fn name(&self) -> &'static str {
    "overlay"
  }

  fn exists(&self, ns: &str, key: &str) -> Result<bool, StoreError> {
    if self.changes.exists(ns, key)? {
      return Ok(true);
    }
    if self.is_deleted(ns, key) {
      return Ok(false);
    }
    self.base.exists(ns, key)
  }

  fn get(&self, ns: &str, key: &str) -> Result<Option<String>, StoreError> {
    if let Some(text) = self.changes.get(ns, key)? {
      return Ok(Some(text));
    }
    if self.is_deleted(ns, key) {
      return Ok(None);
    }
    self.base.read_raw(ns, key)
  }

  fn set(&self, ns: &str, key: &str, data: &str) -> Result<(), StoreError> {
    self.changes.set(ns, key, data)?;
    self.deleted.write().remove(&(ns.to_string(), key.to_string()));
    Ok(())
  }

  fn delete(&self, ns: &str, keys: &[&str]) -> Result<(), StoreError> {
    self.changes.delete(ns, keys)?;
    let mut deleted = self.deleted.write();
    for key in keys {
      deleted.insert((ns.to_string(), key.to_string()));
    }
    Ok(())
  }

  fn list_keys(&self, ns: &str) -> Result<BTreeSet<String>, StoreError> {
    let mut keys = self.base.list_keys(ns)?;
    keys.retain(|k| !self.is_deleted(ns, k));
    keys.extend(self.changes.list_keys(ns)?);
    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tempfile::TempDir;

  #[test]
  fn reads_fall_through_and_writes_stay_in_memory() {
    let temp = TempDir::new().unwrap();
    let base = DocumentStore::local(temp.path());
    base.set("node_attrs", "numpy", &json!({"version": "1.0"})).unwrap();

    let overlay = DocumentStore::overlay(&base);
    assert_eq!(
      overlay.get("node_attrs", "numpy").unwrap(),
      Some(json!({"version": "1.0"}))
    );

    overlay.set("node_attrs", "numpy", &json!({"version": "2.0"})).unwrap();
    overlay.set("node_attrs", "scipy", &json!({})).unwrap();
    assert_eq!(
      overlay.get("node_attrs", "numpy").unwrap(),
      Some(json!({"version": "2.0"}))
    );
    assert_eq!(
      base.get("node_attrs", "numpy").unwrap(),
      Some(json!({"version": "1.0"}))
    );
    assert!(!base.exists("node_attrs", "scipy").unwrap());
    assert_eq!(
      overlay.list_keys("node_attrs").unwrap(),
      BTreeSet::from(["numpy".to_string(), "scipy".to_string()])
    );
  }

  #[test]
  fn deletes_hide_base_documents() {
    let temp = TempDir::new().unwrap();
    let base = DocumentStore::local(temp.path());
    base.set("node_attrs", "numpy", &json!({})).unwrap();

    let overlay = DocumentStore::overlay(&base);
    overlay.delete("node_attrs", &["numpy"]).unwrap();
    assert!(!overlay.exists("node_attrs", "numpy").unwrap());
    assert!(overlay.list_keys("node_attrs").unwrap().is_empty());
    assert!(base.exists("node_attrs", "numpy").unwrap());
  }
}
