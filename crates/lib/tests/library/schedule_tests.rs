//! Scheduling scenarios against an in-memory platform.

use autotick_lib::forge::{ProposalRecord, ProposalState};
use autotick_lib::graph::AttemptRecord;
use autotick_lib::migration::{Common, Migration, VersionMigration};
use autotick_lib::schedule::{NodeOutcome, SkipReason};

use super::common::{Harness, flat_graph, outdated};

fn open_proposal(repo: &str, id: u64) -> ProposalRecord {
  ProposalRecord {
    id,
    number: id,
    repo: repo.into(),
    url: String::new(),
    state: ProposalState::Open,
    mergeable_state: None,
    labels: Vec::new(),
    head_ref: Some("scipy-v2.1.0".into()),
    created_at: None,
    last_modified: Some("r0".into()),
  }
}

#[tokio::test]
async fn first_version_bump_records_one_attempt() {
  let h = Harness::new();
  h.put(&outdated("numpy", "2.1.0"));
  assert!(h.attrs("numpy").attempts.is_empty());

  let report = h
    .scheduler()
    .run_migration(&Migration::version(3), &flat_graph(&["numpy"]))
    .await
    .unwrap();

  let attrs = h.attrs("numpy");
  assert_eq!(attrs.attempts.len(), 1);
  assert_eq!(attrs.attempts[0].fingerprint, "version:2.1.0");
  assert!(attrs.attempts[0].is_open());
  assert!(matches!(report.outcomes.get("numpy"), Some(NodeOutcome::Proposed { .. })));
}

#[tokio::test]
async fn open_attempt_for_same_version_is_not_repeated() {
  let h = Harness::new();
  let mut scipy = outdated("scipy", "2.1.0");
  scipy.attempts.push(AttemptRecord {
    fingerprint: "version:2.1.0".into(),
    migrator_name: "version".into(),
    migrator_version: 0,
    proposal: Some(open_proposal("scipy-feedstock", 7)),
    rerun: false,
    created_at: 1,
  });
  h.put(&scipy);

  let report = h
    .scheduler()
    .run_migration(&Migration::version(3), &flat_graph(&["scipy"]))
    .await
    .unwrap();

  assert_eq!(h.attrs("scipy").attempts.len(), 1);
  assert_eq!(
    report.outcomes.get("scipy"),
    Some(&NodeOutcome::Skipped {
      reason: SkipReason::AlreadyAttempted
    })
  );
  assert!(h.forge.created().is_empty());
}

#[tokio::test]
async fn proposal_cap_limits_new_attempts() {
  let h = Harness::new();
  let names: Vec<String> = (0..10).map(|i| format!("pkg{i}")).collect();
  for name in &names {
    h.put(&outdated(name, "3.0.0"));
  }
  let refs: Vec<&str> = names.iter().map(String::as_str).collect();
  let migration = Migration::Version(VersionMigration {
    common: Common::with_limit(5),
    max_open_proposals: 3,
  });

  let report = h.scheduler().run_migration(&migration, &flat_graph(&refs)).await.unwrap();

  let attempts: usize = names.iter().map(|n| h.attrs(n).attempts.len()).sum();
  assert_eq!(attempts, 5);
  assert_eq!(report.proposals_opened, 5);
  assert_eq!(
    report.count(|o| *o == NodeOutcome::Skipped {
      reason: SkipReason::PrLimit
    }),
    5
  );
}

#[tokio::test]
async fn running_twice_adds_nothing() {
  let h = Harness::new();
  let names = ["a", "b", "c", "d"];
  for name in names {
    h.put(&outdated(name, "2.2.0"));
  }
  let graph = flat_graph(&names);
  let scheduler = h.scheduler();

  scheduler.run_migration(&Migration::version(3), &graph).await.unwrap();
  let second = scheduler.run_migration(&Migration::version(3), &graph).await.unwrap();

  for name in names {
    assert_eq!(h.attrs(name).attempts.len(), 1, "{name}");
  }
  assert_eq!(second.proposals_opened, 0);
  assert_eq!(h.forge.created().len(), names.len());
}

#[tokio::test]
async fn cyclic_graph_processes_every_node_once() {
  let h = Harness::new();
  let mut graph = flat_graph(&["a", "b", "c"]);
  graph.add_edge("a", "b");
  graph.add_edge("b", "c");
  graph.add_edge("c", "a");
  for name in ["a", "b", "c"] {
    h.put(&outdated(name, "9.0.0"));
  }

  let report = h.scheduler().run_migration(&Migration::version(3), &graph).await.unwrap();

  assert_eq!(report.outcomes.len(), 3);
  assert_eq!(report.proposals_opened, 3);
}

#[tokio::test]
async fn up_to_date_and_archived_nodes_are_left_alone() {
  let h = Harness::new();
  let mut current = outdated("current", "2.0.0");
  current.new_version = Some("2.0.0".into());
  let mut archived = outdated("archived", "5.0.0");
  archived.archived = true;
  h.put(&current);
  h.put(&archived);

  let report = h
    .scheduler()
    .run_migration(&Migration::version(3), &flat_graph(&["current", "archived"]))
    .await
    .unwrap();

  assert!(report.outcomes.is_empty());
  assert!(h.attrs("current").attempts.is_empty());
  assert!(h.attrs("archived").attempts.is_empty());
}

#[tokio::test]
async fn run_stops_after_budget_exhaustion() {
  let h = Harness::new();
  h.put(&outdated("numpy", "2.1.0"));
  h.forge.set_budget(0);

  let reports = h
    .scheduler()
    .run(
      vec![Migration::version(3), Migration::version(3)],
      &flat_graph(&["numpy"]),
    )
    .await
    .unwrap();

  assert_eq!(reports.len(), 1);
  assert!(reports[0].aborted.is_some());
}
