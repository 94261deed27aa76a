use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use tracing::debug;

use autotick_lib::config::Settings;
use autotick_lib::locks::{LockMode, RunLock};
use autotick_lib::snapshot::{SNAPSHOT_NAMESPACES, SnapshotMetadata, SnapshotStore, select_pruned};
use autotick_lib::store::DocumentStore;

use crate::output::{OutputFormat, Status, field, print_json, size, status};
use crate::prompts::confirm;

#[derive(Subcommand, Debug)]
pub enum SnapshotCommand {
  /// Capture node documents, the graph and migrations
  Take {
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// List snapshots, oldest first
  List {
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Delete snapshots outside the retention policy
  Prune {
    /// Show what would be deleted without deleting
    #[arg(long)]
    dry_run: bool,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Write a snapshot's documents back into the store
  Restore {
    id: String,

    /// Skip confirmation prompt
    #[arg(long)]
    force: bool,
  },
}

#[derive(Serialize)]
struct PruneOutput {
  pruned: Vec<String>,
  dry_run: bool,
}

pub fn cmd_snapshot(settings: &Settings, command: SnapshotCommand) -> Result<()> {
  let snapshots = SnapshotStore::new(settings.snapshot.dir.clone());
  debug!(dir = %snapshots.base_path().display(), "using snapshot directory");

  match command {
    SnapshotCommand::Take { output } => {
      let _lock = RunLock::acquire(&settings.store.root, LockMode::Shared, "snapshot take")?;
      let store = DocumentStore::from_config(&settings.store).context("Failed to open store")?;
      let meta = snapshots
        .take(&store, &SNAPSHOT_NAMESPACES)
        .context("Failed to take snapshot")?;
      if output.is_json() {
        return print_json(&meta);
      }
      status(Status::Done, format!("Snapshot {} taken", meta.id));
      field("Documents", meta.document_count);
      field("Size", size(meta.bytes));
      Ok(())
    }

    SnapshotCommand::List { output } => {
      let list = snapshots.list().context("Failed to list snapshots")?;
      if output.is_json() {
        return print_json(&list);
      }
      if list.is_empty() {
        status(Status::Note, "No snapshots");
        return Ok(());
      }
      let now = now_secs();
      for meta in &list {
        print_entry(meta, now);
      }
      Ok(())
    }

    SnapshotCommand::Prune { dry_run, output } => {
      let policy = &settings.snapshot.retention;
      let now = now_secs();
      let pruned = if dry_run {
        let list = snapshots.list().context("Failed to list snapshots")?;
        select_pruned(&list, now, policy)
      } else {
        snapshots.prune(policy, now).context("Failed to prune snapshots")?
      };

      if output.is_json() {
        return print_json(&PruneOutput { pruned, dry_run });
      }
      if pruned.is_empty() {
        status(Status::Note, "Nothing to prune");
        return Ok(());
      }
      for id in &pruned {
        status(Status::Removed, id);
      }
      if dry_run {
        status(Status::Note, format!("Would delete {} snapshot(s)", pruned.len()));
      } else {
        status(Status::Done, format!("Deleted {} snapshot(s)", pruned.len()));
      }
      Ok(())
    }

    SnapshotCommand::Restore { id, force } => {
      if !confirm(&format!("Overwrite store documents with snapshot {id}?"), force)? {
        status(Status::Warn, "Restore cancelled");
        return Ok(());
      }
      let _lock = RunLock::acquire(&settings.store.root, LockMode::Exclusive, "snapshot restore")?;
      let store = DocumentStore::from_config(&settings.store).context("Failed to open store")?;
      let written = snapshots
        .restore(&id, &store)
        .with_context(|| format!("Failed to restore snapshot {id}"))?;
      status(Status::Done, format!("Restored {written} document(s) from {id}"));
      Ok(())
    }
  }
}

fn print_entry(meta: &SnapshotMetadata, now: u64) {
  let age = Duration::from_secs(now.saturating_sub(meta.created_at));
  println!(
    "{} {}  {} docs  {}  {} ago",
    Status::Note.marker(),
    meta.id,
    meta.document_count,
    size(meta.bytes),
    humantime::format_duration(age)
  );
}

fn now_secs() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}
