//! Local filesystem backend.
//!
//! # Layout
//!
//! ```text
//! <root>/
//! └── <ns>/
//!     └── a/b/c/d/e/
//!         └── <key>.json
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::trace;
use walkdir::WalkDir;

use super::backend::{StoreBackend, StoreError, validate_name};
use super::paths::{doc_file, key_from_file_name};

const BACKEND: &str = "file";

#[derive(Debug, Clone)]
pub struct FileBackend {
  root: PathBuf,
}

impl FileBackend {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn io_err(ns: &str, key: &str, source: io::Error) -> StoreError {
    StoreError::Io {
      backend: BACKEND,
      ns: ns.to_string(),
      key: key.to_string(),
      source,
    }
  }
}

impl StoreBackend for FileBackend {
  fn name(&self) -> &'static str {
    BACKEND
  }

  fn is_local(&self) -> bool {
    true
  }

  fn exists(&self, ns: &str, key: &str) -> Result<bool, StoreError> {
    validate_name(ns)?;
    validate_name(key)?;
    Ok(doc_file(&self.root, ns, key).is_file())
  }

  fn get(&self, ns: &str, key: &str) -> Result<Option<String>, StoreError> {
    validate_name(ns)?;
    validate_name(key)?;
    match fs::read_to_string(doc_file(&self.root, ns, key)) {
      Ok(content) => Ok(Some(content)),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(Self::io_err(ns, key, e)),
    }
  }

  /// Atomic write: temp file in the target directory, then rename.
  fn set(&self, ns: &str, key: &str, data: &str) -> Result<(), StoreError> {
    validate_name(ns)?;
    validate_name(key)?;
    let path = doc_file(&self.root, ns, key);
    let parent = path.parent().unwrap_or(&self.root);
    fs::create_dir_all(parent).map_err(|e| Self::io_err(ns, key, e))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| Self::io_err(ns, key, e))?;
    temp.write_all(data.as_bytes()).map_err(|e| Self::io_err(ns, key, e))?;
    temp.flush().map_err(|e| Self::io_err(ns, key, e))?;
    temp.persist(&path).map_err(|e| Self::io_err(ns, key, e.error))?;

    trace!(ns, key, path = %path.display(), "wrote document");
    Ok(())
  }

  fn delete(&self, ns: &str, keys: &[&str]) -> Result<(), StoreError> {
    validate_name(ns)?;
    for key in keys {
      validate_name(key)?;
      match fs::remove_file(doc_file(&self.root, ns, key)) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(Self::io_err(ns, key, e)),
      }
    }
    Ok(())
  }

  fn list_keys(&self, ns: &str) -> Result<BTreeSet<String>, StoreError> {
    validate_name(ns)?;
    let dir = self.root.join(ns);
    if !dir.exists() {
      return Ok(BTreeSet::new());
    }

    let mut keys = BTreeSet::new();
    for entry in WalkDir::new(&dir) {
      let entry = entry.map_err(|e| Self::io_err(ns, "*", io::Error::other(e)))?;
      if !entry.file_type().is_file() {
        continue;
      }
      if let Some(key) = entry.file_name().to_str().and_then(key_from_file_name) {
        keys.insert(key.to_string());
      }
    }
    Ok(keys)
  }
}
