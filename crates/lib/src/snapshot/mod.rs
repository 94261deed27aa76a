//! Point-in-time copies of the document store and their retention.

mod retention;
mod storage;
mod types;

pub use retention::{RetentionPolicy, select_pruned};
pub use storage::{SNAPSHOT_NAMESPACES, SnapshotStore};
pub use types::{SNAPSHOT_INDEX_VERSION, Snapshot, SnapshotError, SnapshotIndex, SnapshotMetadata, generate_snapshot_id};
