use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Current version of the snapshot index format.
pub const SNAPSHOT_INDEX_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
  #[error("snapshot not found: {0}")]
  NotFound(String),

  #[error("failed to create snapshot directory: {0}")]
  CreateDir(#[source] std::io::Error),

  #[error("failed to read snapshot: {0}")]
  Read(#[source] std::io::Error),

  #[error("failed to write snapshot: {0}")]
  Write(#[source] std::io::Error),

  #[error("failed to parse snapshot: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize snapshot: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported snapshot index version {0}")]
  UnsupportedVersion(u32),

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Raw documents of the store at one point in time, `ns -> key -> text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
  pub id: String,
  pub created_at: u64,
  pub documents: BTreeMap<String, BTreeMap<String, String>>,
}

impl Snapshot {
  pub fn new(id: String, documents: BTreeMap<String, BTreeMap<String, String>>) -> Self {
    Self {
      id,
      created_at: now_secs(),
      documents,
    }
  }

  pub fn document_count(&self) -> usize {
    self.documents.values().map(BTreeMap::len).sum()
  }

  pub fn to_metadata(&self, bytes: u64) -> SnapshotMetadata {
    SnapshotMetadata {
      id: self.id.clone(),
      created_at: self.created_at,
      document_count: self.document_count(),
      bytes,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
  pub id: String,
  /// Unix seconds.
  pub created_at: u64,
  pub document_count: usize,
  /// Compressed size on disk.
  pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotIndex {
  pub version: u32,
  /// Oldest first.
  pub snapshots: Vec<SnapshotMetadata>,
}

impl Default for SnapshotIndex {
  fn default() -> Self {
    Self::new()
  }
}

impl SnapshotIndex {
  pub fn new() -> Self {
    Self {
      version: SNAPSHOT_INDEX_VERSION,
      snapshots: Vec::new(),
    }
  }

  /// Insert keeping chronological order; an entry with the same id is replaced.
  pub fn add(&mut self, meta: SnapshotMetadata) {
    self.remove(&meta.id);
    let pos = self.snapshots.partition_point(|s| s.created_at <= meta.created_at);
    self.snapshots.insert(pos, meta);
  }

  pub fn remove(&mut self, id: &str) {
    self.snapshots.retain(|s| s.id != id);
  }

  pub fn is_empty(&self) -> bool {
    self.snapshots.is_empty()
  }

  pub fn len(&self) -> usize {
    self.snapshots.len()
  }
}

pub(crate) fn now_secs() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or_default()
}

/// Time-ordered id: milliseconds since the epoch plus a process-local sequence.
pub fn generate_snapshot_id() -> String {
  static SEQ: AtomicU64 = AtomicU64::new(0);
  let millis = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or_default();
  let seq = SEQ.fetch_add(1, Ordering::Relaxed) % 0x1000;
  format!("{millis:012x}{seq:03x}")
}
