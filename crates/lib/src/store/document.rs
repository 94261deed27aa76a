//! Lazily-loaded document handles with scoped, commit-on-release mutation.
//!
//! A [`Document`] does no I/O until first accessed. Mutable access exists only through
//! a [`DocGuard`]; when the outermost guard is released the value is re-serialized,
//! compared by hash against what was loaded, written only if it changed, and evicted
//! from memory. Nested scopes obtained with [`DocGuard::scope`] coalesce into the
//! outer scope's single write.

use std::ops::{Deref, DerefMut};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{error, trace};

use super::DocumentStore;
use super::backend::StoreError;
use super::codec;
use crate::util::hash::{ContentHash, hash_bytes};

pub struct Document {
  store: DocumentStore,
  ns: String,
  key: String,
  data: Option<Value>,
  loaded_hash: Option<ContentHash>,
}

impl std::fmt::Debug for Document {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Document")
      .field("ns", &self.ns)
      .field("key", &self.key)
      .field("loaded", &self.data.is_some())
      .finish()
  }
}

impl Document {
  pub(crate) fn new(store: DocumentStore, ns: &str, key: &str) -> Self {
    Self {
      store,
      ns: ns.to_string(),
      key: key.to_string(),
      data: None,
      loaded_hash: None,
    }
  }

  pub fn ns(&self) -> &str {
    &self.ns
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  /// Whether the value is currently held in memory.
  pub fn is_loaded(&self) -> bool {
    self.data.is_some()
  }

  /// Load the value if needed.
  ///
  /// A document that does not exist yet is created as `{}` in every writable backend.
  fn load(&mut self) -> Result<&mut Value, StoreError> {
    if self.data.is_none() {
      let value = match self.store.read_raw(&self.ns, &self.key)? {
        Some(text) => codec::loads(&self.ns, &self.key, &text)?,
        None => {
          let empty = Value::Object(Map::new());
          let text = codec::dumps(&empty)?;
          trace!(ns = %self.ns, key = %self.key, "initializing missing document");
          self.store.write_raw(&self.ns, &self.key, &text)?;
          empty
        }
      };
      self.loaded_hash = Some(hash_bytes(codec::dumps(&value)?.as_bytes()));
      self.data = Some(value);
    }
    Ok(self.data.get_or_insert_with(|| Value::Object(Map::new())))
  }

  /// Read-only view of the value.
  pub fn get(&mut self) -> Result<&Value, StoreError> {
    self.load().map(|v| &*v)
  }

  /// Decode the value into a typed document.
  pub fn read<T: DeserializeOwned>(&mut self) -> Result<T, StoreError> {
    let value = self.get()?.clone();
    codec::from_value(&self.ns, &self.key, value)
  }

  /// Open a mutable scope.
  pub fn edit(&mut self) -> Result<DocGuard<'_>, StoreError> {
    self.load()?;
    Ok(DocGuard {
      doc: self,
      outermost: true,
      released: false,
    })
  }

  /// Decode, mutate and write back a typed document in one scope.
  ///
  /// Returns the closure's result and whether a write happened.
  pub fn modify<T, R>(&mut self, f: impl FnOnce(&mut T) -> R) -> Result<(R, bool), StoreError>
  where
    T: DeserializeOwned + Serialize,
  {
    let mut guard = self.edit()?;
    let mut typed: T = codec::from_value(&guard.doc.ns, &guard.doc.key, guard.clone())?;
    let out = f(&mut typed);
    *guard = serde_json::to_value(&typed).map_err(StoreError::Encode)?;
    let written = guard.finish()?;
    Ok((out, written))
  }

  /// Drop the in-memory value; the next access reloads it.
  pub fn purge(&mut self) {
    self.data = None;
    self.loaded_hash = None;
  }

  /// Write back if changed, then evict.
  fn commit(&mut self) -> Result<bool, StoreError> {
    let Some(data) = self.data.as_ref() else {
      return Ok(false);
    };
    let text = codec::dumps(data)?;
    let hash = hash_bytes(text.as_bytes());
    let changed = self.loaded_hash.as_ref() != Some(&hash);
    if changed {
      self.store.write_raw(&self.ns, &self.key, &text)?;
      trace!(ns = %self.ns, key = %self.key, "committed document");
    } else {
      trace!(ns = %self.ns, key = %self.key, "document unchanged, skipping write");
    }
    self.purge();
    Ok(changed)
  }
}

/// Exclusive, mutable access to a loaded document.
///
/// Releasing the outermost guard commits: explicitly through [`DocGuard::finish`],
/// which reports backend errors, or implicitly on drop, which logs them.
pub struct DocGuard<'a> {
  doc: &'a mut Document,
  outermost: bool,
  released: bool,
}

impl DocGuard<'_> {
  /// Re-enter the same document; the nested scope never writes on its own.
  pub fn scope(&mut self) -> DocGuard<'_> {
    DocGuard {
      doc: &mut *self.doc,
      outermost: false,
      released: false,
    }
  }

  /// Replace the value with a serialized typed document.
  pub fn set_typed<T: Serialize>(&mut self, value: &T) -> Result<(), StoreError> {
    **self = serde_json::to_value(value).map_err(StoreError::Encode)?;
    Ok(())
  }

  /// Release the scope, returning whether a write happened.
  pub fn finish(mut self) -> Result<bool, StoreError> {
    self.released = true;
    if self.outermost {
      self.doc.commit()
    } else {
      Ok(false)
    }
  }
}

impl Deref for DocGuard<'_> {
  type Target = Value;

  fn deref(&self) -> &Value {
    self.doc.data.as_ref().unwrap_or(&Value::Null)
  }
}

impl DerefMut for DocGuard<'_> {
  fn deref_mut(&mut self) -> &mut Value {
    self.doc.data.get_or_insert_with(|| Value::Object(Map::new()))
  }
}

impl Drop for DocGuard<'_> {
  fn drop(&mut self) {
    if self.released || !self.outermost {
      return;
    }
    if let Err(e) = self.doc.commit() {
      error!(ns = %self.doc.ns, key = %self.doc.key, error = %e, "failed to commit document");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::{FileBackend, MemoryBackend, StoreBackend};
  use serde_json::json;
  use std::sync::Arc;
  use tempfile::TempDir;

  fn store_with_replica() -> (TempDir, DocumentStore, Arc<MemoryBackend>) {
    let temp = TempDir::new().unwrap();
    let replica = Arc::new(MemoryBackend::new());
    let replicas: Vec<Arc<dyn StoreBackend>> = vec![replica.clone()];
    let store = DocumentStore::new(Arc::new(FileBackend::new(temp.path())), replicas, None);
    (temp, store, replica)
  }

  #[test]
  fn handle_is_lazy() {
    let (_temp, store, replica) = store_with_replica();
    let doc = store.document("node_attrs", "numpy");
    assert!(!doc.is_loaded());
    assert_eq!(replica.writes(), 0);
  }

  #[test]
  fn missing_document_is_created_empty() {
    let (_temp, store, replica) = store_with_replica();
    let mut doc = store.document("node_attrs", "numpy");
    assert_eq!(doc.get().unwrap(), &json!({}));
    assert!(store.exists("node_attrs", "numpy").unwrap());
    assert_eq!(replica.writes(), 1);
  }

  #[test]
  fn unchanged_scope_does_not_write() {
    let (_temp, store, replica) = store_with_replica();
    store.set("node_attrs", "numpy", &json!({"version": "1.0"})).unwrap();
    let before = replica.writes();

    let mut doc = store.document("node_attrs", "numpy");
    let mut guard = doc.edit().unwrap();
    guard["version"] = json!("1.0");
    assert!(!guard.finish().unwrap());
    assert_eq!(replica.writes(), before);
  }

  #[test]
  fn changed_scope_writes_once_and_evicts() {
    let (_temp, store, replica) = store_with_replica();
    store.set("node_attrs", "numpy", &json!({"version": "1.0"})).unwrap();
    let before = replica.writes();

    let mut doc = store.document("node_attrs", "numpy");
    {
      let mut guard = doc.edit().unwrap();
      guard["version"] = json!("2.0");
    }
    assert_eq!(replica.writes(), before + 1);
    assert!(!doc.is_loaded());
    assert_eq!(doc.get().unwrap()["version"], json!("2.0"));
  }

  #[test]
  fn nested_scopes_coalesce() {
    let (_temp, store, replica) = store_with_replica();
    store.set("ns", "k", &json!({})).unwrap();
    let before = replica.writes();

    let mut doc = store.document("ns", "k");
    let mut outer = doc.edit().unwrap();
    outer["a"] = json!(1);
    {
      let mut inner = outer.scope();
      inner["b"] = json!(2);
      assert!(!inner.finish().unwrap());
    }
    assert_eq!(replica.writes(), before);
    assert!(outer.finish().unwrap());
    assert_eq!(replica.writes(), before + 1);
    assert_eq!(store.get("ns", "k").unwrap(), Some(json!({"a": 1, "b": 2})));
  }

  #[test]
  fn modify_round_trips_typed_values() {
    #[derive(serde::Serialize, serde::Deserialize, Default)]
    struct Counter {
      #[serde(default)]
      n: u32,
    }

    let (_temp, store, _replica) = store_with_replica();
    let mut doc = store.document("ns", "counter");
    let (n, written) = doc
      .modify(|c: &mut Counter| {
        c.n += 1;
        c.n
      })
      .unwrap();
    assert_eq!(n, 1);
    assert!(written);
    assert_eq!(doc.read::<Counter>().unwrap().n, 1);
  }

  #[test]
  fn key_order_change_is_not_a_write() {
    let (_temp, store, replica) = store_with_replica();
    store.set("ns", "k", &json!({"a": 1, "b": 2})).unwrap();
    let before = replica.writes();

    let mut doc = store.document("ns", "k");
    let mut guard = doc.edit().unwrap();
    *guard = json!({"b": 2, "a": 1});
    assert!(!guard.finish().unwrap());
    assert_eq!(replica.writes(), before);
  }
}
