//! Snapshot storage on disk.
//!
//! # Storage Layout
//!
//! ```text
//! {snapshot_dir}/
//! ├── index.json          # SnapshotIndex
//! └── <id>.json.gz        # gzip-compressed Snapshot
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, info};

use super::retention::{RetentionPolicy, select_pruned};
use super::types::{SNAPSHOT_INDEX_VERSION, Snapshot, SnapshotError, SnapshotIndex, SnapshotMetadata, generate_snapshot_id};
use crate::consts::{GRAPH_NS, MIGRATIONS_NS, NODE_ATTRS_NS};
use crate::store::DocumentStore;

const INDEX_FILENAME: &str = "index.json";

/// Namespaces captured by default.
pub const SNAPSHOT_NAMESPACES: [&str; 3] = [NODE_ATTRS_NS, GRAPH_NS, MIGRATIONS_NS];

/// Manages snapshot files in one directory.
///
/// Files are written to a temporary name and renamed into place.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
  base_path: PathBuf,
}

impl SnapshotStore {
  pub fn new(base_path: PathBuf) -> Self {
    Self { base_path }
  }

  pub fn base_path(&self) -> &Path {
    &self.base_path
  }

  fn index_path(&self) -> PathBuf {
    self.base_path.join(INDEX_FILENAME)
  }

  fn snapshot_path(&self, id: &str) -> PathBuf {
    self.base_path.join(format!("{id}.json.gz"))
  }

  fn ensure_dir(&self) -> Result<(), SnapshotError> {
    fs::create_dir_all(&self.base_path).map_err(SnapshotError::CreateDir)
  }

  fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    self.ensure_dir()?;
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    fs::write(&temp, bytes).map_err(SnapshotError::Write)?;
    fs::rename(&temp, path).map_err(SnapshotError::Write)
  }

  /// Load the index; a missing index is empty.
  pub fn load_index(&self) -> Result<SnapshotIndex, SnapshotError> {
    let content = match fs::read_to_string(self.index_path()) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SnapshotIndex::new()),
      Err(e) => return Err(SnapshotError::Read(e)),
    };
    let index: SnapshotIndex = serde_json::from_str(&content).map_err(SnapshotError::Parse)?;
    if index.version != SNAPSHOT_INDEX_VERSION {
      return Err(SnapshotError::UnsupportedVersion(index.version));
    }
    Ok(index)
  }

  fn save_index(&self, index: &SnapshotIndex) -> Result<(), SnapshotError> {
    let content = serde_json::to_string_pretty(index).map_err(SnapshotError::Serialize)?;
    self.write_atomic(&self.index_path(), content.as_bytes())
  }

  pub fn load_snapshot(&self, id: &str) -> Result<Snapshot, SnapshotError> {
    let file = fs::File::open(self.snapshot_path(id)).map_err(|e| {
      if e.kind() == io::ErrorKind::NotFound {
        SnapshotError::NotFound(id.to_string())
      } else {
        SnapshotError::Read(e)
      }
    })?;
    let mut json = String::new();
    GzDecoder::new(file)
      .read_to_string(&mut json)
      .map_err(SnapshotError::Read)?;
    serde_json::from_str(&json).map_err(SnapshotError::Parse)
  }

  /// Write a snapshot and add it to the index.
  pub fn save_snapshot(&self, snapshot: &Snapshot) -> Result<SnapshotMetadata, SnapshotError> {
    let json = serde_json::to_vec(snapshot).map_err(SnapshotError::Serialize)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).map_err(SnapshotError::Write)?;
    let bytes = encoder.finish().map_err(SnapshotError::Write)?;
    self.write_atomic(&self.snapshot_path(&snapshot.id), &bytes)?;

    let meta = snapshot.to_metadata(bytes.len() as u64);
    let mut index = self.load_index()?;
    index.add(meta.clone());
    self.save_index(&index)?;
    Ok(meta)
  }

  /// Oldest first.
  pub fn list(&self) -> Result<Vec<SnapshotMetadata>, SnapshotError> {
    Ok(self.load_index()?.snapshots)
  }

  pub fn delete_snapshot(&self, id: &str) -> Result<(), SnapshotError> {
    match fs::remove_file(self.snapshot_path(id)) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(SnapshotError::Write(e)),
    }
    let mut index = self.load_index()?;
    index.remove(id);
    self.save_index(&index)
  }

  /// Capture the given namespaces of `store` and save the result.
  pub fn take(&self, store: &DocumentStore, namespaces: &[&str]) -> Result<SnapshotMetadata, SnapshotError> {
    let mut documents = BTreeMap::new();
    for ns in namespaces {
      let mut docs = BTreeMap::new();
      for key in store.list_keys(ns)? {
        if let Some(text) = store.read_raw(ns, &key)? {
          docs.insert(key, text);
        }
      }
      debug!(ns, documents = docs.len(), "captured namespace");
      documents.insert(ns.to_string(), docs);
    }
    let snapshot = Snapshot::new(generate_snapshot_id(), documents);
    let meta = self.save_snapshot(&snapshot)?;
    info!(id = %meta.id, documents = meta.document_count, bytes = meta.bytes, "snapshot taken");
    Ok(meta)
  }

  /// Write every document of a snapshot back into `store`.
  ///
  /// Documents absent from the snapshot are left alone.
  pub fn restore(&self, id: &str, store: &DocumentStore) -> Result<usize, SnapshotError> {
    let snapshot = self.load_snapshot(id)?;
    let mut written = 0;
    for (ns, docs) in &snapshot.documents {
      for (key, text) in docs {
        store.write_raw(ns, key, text)?;
        written += 1;
      }
    }
    info!(id, documents = written, "snapshot restored");
    Ok(written)
  }

  /// Delete the snapshots `policy` does not retain at `now` (unix seconds).
  pub fn prune(&self, policy: &RetentionPolicy, now: u64) -> Result<Vec<String>, SnapshotError> {
    let pruned = select_pruned(&self.list()?, now, policy);
    for id in &pruned {
      self.delete_snapshot(id)?;
    }
    if !pruned.is_empty() {
      info!(pruned = pruned.len(), "pruned snapshots");
    }
    Ok(pruned)
  }
}
