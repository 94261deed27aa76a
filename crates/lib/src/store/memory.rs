//! Process-local backend, used for dry runs and as an observable replica.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::backend::{StoreBackend, StoreError, validate_name};

#[derive(Debug, Default)]
pub struct MemoryBackend {
  docs: RwLock<BTreeMap<(String, String), String>>,
  writes: AtomicUsize,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of `set` calls this backend has served.
  pub fn writes(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }
}

impl StoreBackend for MemoryBackend {
  fn name(&self) -> &'static str {
    "memory"
  }

  fn exists(&self, ns: &str, key: &str) -> Result<bool, StoreError> {
    Ok(self.docs.read().contains_key(&(ns.to_string(), key.to_string())))
  }

  fn get(&self, ns: &str, key: &str) -> Result<Option<String>, StoreError> {
    Ok(self.docs.read().get(&(ns.to_string(), key.to_string())).cloned())
  }

  fn set(&self, ns: &str, key: &str, data: &str) -> Result<(), StoreError> {
    validate_name(ns)?;
    validate_name(key)?;
    self.docs.write().insert((ns.to_string(), key.to_string()), data.to_string());
    self.writes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  fn delete(&self, ns: &str, keys: &[&str]) -> Result<(), StoreError> {
    let mut docs = self.docs.write();
    for key in keys {
      docs.remove(&(ns.to_string(), key.to_string()));
    }
    Ok(())
  }

  fn list_keys(&self, ns: &str) -> Result<BTreeSet<String>, StoreError> {
    Ok(
      self
        .docs
        .read()
        .keys()
        .filter(|(n, _)| n == ns)
        .map(|(_, k)| k.clone())
        .collect(),
    )
  }
}
