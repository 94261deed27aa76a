//! Sharded, replicated document store.
//!
//! The store is a namespace/key map of JSON documents kept by one or more
//! [`StoreBackend`]s. The first configured backend is the primary and serves reads;
//! when it is not local, a [`FileBackend`] cache under the store root sits in front
//! of it. Writes go to the cache and to every writable backend.
//!
//! # Layout
//!
//! ```text
//! <root>/
//! ├── node_attrs/             # one document per feedstock
//! │   └── a/b/c/d/e/numpy.json
//! ├── graph/                  # persisted dependency graph
//! └── migrators/              # migration specs of the last run
//! ```
//!
//! Documents are usually accessed through a [`Document`] handle, which loads lazily,
//! hands out mutable access only inside a [`DocGuard`] scope, and writes back only
//! when the canonical serialization changed.

pub mod backend;
pub mod codec;
pub mod document;
pub mod file;
pub mod http;
pub mod memory;
pub mod overlay;
pub mod paths;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

pub use backend::{BackendKind, StoreBackend, StoreError};
pub use codec::{DocRef, StoredSet};
pub use document::{DocGuard, Document};
pub use file::FileBackend;
pub use http::HttpBackend;
pub use memory::MemoryBackend;
pub use overlay::OverlayBackend;

/// How to assemble a [`DocumentStore`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// Root of the local file backend and of the cache for remote primaries.
  pub root: PathBuf,
  /// Ordered backends; the first is the primary.
  pub backends: Vec<BackendKind>,
  /// Base url for the http backend.
  pub http_base_url: Option<String>,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      root: crate::paths::default_store_root(),
      backends: vec![BackendKind::File],
      http_base_url: None,
    }
  }
}

#[derive(Debug)]
struct Inner {
  primary: Arc<dyn StoreBackend>,
  replicas: Vec<Arc<dyn StoreBackend>>,
  cache: Option<FileBackend>,
}

/// Handle to the store; cheap to clone and shareable across workers.
#[derive(Debug, Clone)]
pub struct DocumentStore {
  inner: Arc<Inner>,
}

impl DocumentStore {
  /// Assemble a store from already-built backends.
  ///
  /// `cache` is only consulted when the primary is not local.
  pub fn new(primary: Arc<dyn StoreBackend>, replicas: Vec<Arc<dyn StoreBackend>>, cache: Option<FileBackend>) -> Self {
    let cache = if primary.is_local() { None } else { cache };
    Self {
      inner: Arc::new(Inner {
        primary,
        replicas,
        cache,
      }),
    }
  }

  /// A store backed by a single local directory.
  pub fn local(root: impl Into<PathBuf>) -> Self {
    Self::new(Arc::new(FileBackend::new(root)), Vec::new(), None)
  }

  /// A store that reads through `base` and keeps every write in memory.
  pub fn overlay(base: &DocumentStore) -> Self {
    Self::new(Arc::new(OverlayBackend::new(base.clone())), Vec::new(), None)
  }

  /// Build the backends named in `config`.
  pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
    let mut backends: Vec<Arc<dyn StoreBackend>> = Vec::new();
    for kind in &config.backends {
      let backend: Arc<dyn StoreBackend> = match kind {
        BackendKind::File => Arc::new(FileBackend::new(&config.root)),
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::Http => {
          let url = config.http_base_url.as_deref().ok_or(StoreError::MissingBaseUrl)?;
          Arc::new(HttpBackend::new(url)?)
        }
      };
      backends.push(backend);
    }

    let mut iter = backends.into_iter();
    let primary: Arc<dyn StoreBackend> = iter.next().unwrap_or_else(|| Arc::new(FileBackend::new(&config.root)));
    let replicas: Vec<_> = iter.collect();
    debug!(
      primary = primary.name(),
      replicas = replicas.len(),
      root = %config.root.display(),
      "opened document store"
    );
    Ok(Self::new(primary, replicas, Some(FileBackend::new(&config.root))))
  }

  pub fn primary(&self) -> &dyn StoreBackend {
    self.inner.primary.as_ref()
  }

  /// A lazy handle; no I/O happens until the document is accessed.
  pub fn document(&self, ns: &str, key: &str) -> Document {
    Document::new(self.clone(), ns, key)
  }

  /// Resolve an embedded reference to a handle on its target.
  pub fn resolve(&self, doc_ref: &DocRef) -> Result<Document, StoreError> {
    let (ns, key) = doc_ref.target()?;
    Ok(self.document(&ns, &key))
  }

  pub fn exists(&self, ns: &str, key: &str) -> Result<bool, StoreError> {
    if let Some(cache) = &self.inner.cache
      && cache.exists(ns, key)?
    {
      return Ok(true);
    }
    self.inner.primary.exists(ns, key)
  }

  pub fn get(&self, ns: &str, key: &str) -> Result<Option<Value>, StoreError> {
    self
      .read_raw(ns, key)?
      .map(|text| codec::loads(ns, key, &text))
      .transpose()
  }

  /// Unconditionally write `value` to every writable backend.
  pub fn set(&self, ns: &str, key: &str, value: &Value) -> Result<(), StoreError> {
    let text = codec::dumps(value)?;
    self.write_raw(ns, key, &text)
  }

  pub fn delete(&self, ns: &str, keys: &[&str]) -> Result<(), StoreError> {
    if let Some(cache) = &self.inner.cache {
      cache.delete(ns, keys)?;
    }
    for backend in self.writable_backends() {
      backend.delete(ns, keys)?;
    }
    Ok(())
  }

  pub fn list_keys(&self, ns: &str) -> Result<BTreeSet<String>, StoreError> {
    self.inner.primary.list_keys(ns)
  }

  /// Raw read: local cache first, then the primary (filling the cache on a hit).
  pub(crate) fn read_raw(&self, ns: &str, key: &str) -> Result<Option<String>, StoreError> {
    if let Some(cache) = &self.inner.cache
      && let Some(text) = cache.get(ns, key)?
    {
      return Ok(Some(text));
    }

    let text = self.inner.primary.get(ns, key)?;
    if let (Some(cache), Some(text)) = (&self.inner.cache, &text) {
      cache.set(ns, key, text)?;
    }
    Ok(text)
  }

  /// Raw write to the cache and every writable backend, primary first.
  pub(crate) fn write_raw(&self, ns: &str, key: &str, text: &str) -> Result<(), StoreError> {
    if let Some(cache) = &self.inner.cache {
      cache.set(ns, key, text)?;
    }
    for backend in self.writable_backends() {
      trace!(backend = backend.name(), ns, key, "writing document");
      backend.set(ns, key, text)?;
    }
    Ok(())
  }

  fn writable_backends(&self) -> impl Iterator<Item = &Arc<dyn StoreBackend>> {
    std::iter::once(&self.inner.primary)
      .chain(self.inner.replicas.iter())
      .filter(|b| b.is_writable())
  }
}
