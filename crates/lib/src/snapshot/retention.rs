//! Tiered retention of store snapshots.
//!
//! Every snapshot younger than `recent_secs` is kept. Between that and `daily_secs`
//! the newest snapshot of each day survives, beyond it the newest of each week. On
//! top of the tiers at most `max_count` snapshots are kept, newest first.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::types::SnapshotMetadata;

const DAY: u64 = 24 * 60 * 60;
const WEEK: u64 = 7 * DAY;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
  pub recent_secs: u64,
  pub daily_secs: u64,
  pub max_count: usize,
}

impl Default for RetentionPolicy {
  fn default() -> Self {
    Self {
      recent_secs: DAY,
      daily_secs: 30 * DAY,
      max_count: 100,
    }
  }
}

/// Ids of the snapshots `policy` drops at time `now`, oldest first.
pub fn select_pruned(snapshots: &[SnapshotMetadata], now: u64, policy: &RetentionPolicy) -> Vec<String> {
  let mut newest_first: Vec<&SnapshotMetadata> = snapshots.iter().collect();
  newest_first.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

  let mut days = BTreeSet::new();
  let mut weeks = BTreeSet::new();
  let mut kept = 0usize;
  let mut pruned = Vec::new();

  for snap in newest_first {
    let age = now.saturating_sub(snap.created_at);
    let keep = if age < policy.recent_secs {
      true
    } else if age < policy.daily_secs {
      days.insert(snap.created_at / DAY)
    } else {
      weeks.insert(snap.created_at / WEEK)
    };

    if keep && kept < policy.max_count {
      kept += 1;
    } else {
      pruned.push(snap.id.clone());
    }
  }

  pruned.reverse();
  pruned
}

#[cfg(test)]
mod tests {
  use super::*;

  const NOW: u64 = 1_000 * DAY;

  fn snap(id: &str, age: u64) -> SnapshotMetadata {
    SnapshotMetadata {
      id: id.into(),
      created_at: NOW - age,
      document_count: 0,
      bytes: 0,
    }
  }

  #[test]
  fn recent_snapshots_are_all_kept() {
    let snaps: Vec<_> = (0..10).map(|i| snap(&format!("s{i}"), i * 60)).collect();
    assert!(select_pruned(&snaps, NOW, &RetentionPolicy::default()).is_empty());
  }

  #[test]
  fn one_per_day_in_daily_tier() {
    let snaps = vec![
      snap("d2-new", 2 * DAY - 7200),
      snap("d2-old", 2 * DAY - 3600),
      snap("d3", 3 * DAY),
    ];
    assert_eq!(select_pruned(&snaps, NOW, &RetentionPolicy::default()), vec!["d2-old"]);
  }

  #[test]
  fn one_per_week_beyond_daily_tier() {
    let snaps: Vec<_> = (40..47).map(|d| snap(&format!("d{d}"), d * DAY)).collect();
    let pruned = select_pruned(&snaps, NOW, &RetentionPolicy::default());
    assert_eq!(pruned.len(), 5);
    assert!(!pruned.contains(&"d40".to_string()));
  }

  #[test]
  fn max_count_drops_oldest() {
    let snaps: Vec<_> = (0..5).map(|i| snap(&format!("s{i}"), i)).collect();
    let policy = RetentionPolicy {
      max_count: 2,
      ..RetentionPolicy::default()
    };
    assert_eq!(select_pruned(&snaps, NOW, &policy), vec!["s4", "s3", "s2"]);
  }
}
