//! Reconciliation of scheduled proposals.

use autotick_lib::forge::ProposalState;
use autotick_lib::migration::Migration;
use autotick_lib::reconcile::{ReconcileConfig, Reconciler, Transition};
use autotick_lib::schedule::NodeOutcome;

use super::common::{Harness, flat_graph, outdated};

fn reconciler(h: &Harness) -> Reconciler {
  Reconciler::new(h.store.clone(), h.forge.clone(), ReconcileConfig::default())
}

#[tokio::test]
async fn rerun_label_closes_and_allows_regeneration() {
  let h = Harness::new();
  h.put(&outdated("numpy", "2.1.0"));
  let graph = flat_graph(&["numpy"]);
  h.scheduler().run_migration(&Migration::version(3), &graph).await.unwrap();

  let first = h.attrs("numpy").attempts[0].proposal.clone().unwrap();
  h.forge.add_label(first.id, "bot-rerun");

  let transitions = reconciler(&h).reconcile_node("numpy").unwrap();
  assert_eq!(transitions.get(&first.number), Some(&Transition::Rerun));

  let attempt = h.attrs("numpy").attempts[0].clone();
  let proposal = attempt.proposal.clone().unwrap();
  assert_eq!(proposal.state, ProposalState::Closed);
  assert!(proposal.head_ref.is_none());
  assert!(attempt.rerun);

  let report = h.scheduler().run_migration(&Migration::version(3), &graph).await.unwrap();
  assert!(matches!(report.outcomes.get("numpy"), Some(NodeOutcome::Proposed { .. })));
  let attrs = h.attrs("numpy");
  assert_eq!(attrs.attempts.len(), 2);
  assert!(attrs.attempts[1].is_open());
}

#[tokio::test]
async fn merged_proposal_keeps_fingerprint_blocked() {
  let h = Harness::new();
  h.put(&outdated("numpy", "2.1.0"));
  let graph = flat_graph(&["numpy"]);
  h.scheduler().run_migration(&Migration::version(3), &graph).await.unwrap();

  let proposal = h.attrs("numpy").attempts[0].proposal.clone().unwrap();
  h.forge.set_state(proposal.id, ProposalState::Merged);
  let report = reconciler(&h).reconcile_all().unwrap();
  assert_eq!(
    report.count(|t| matches!(t, Transition::StateChanged { to: ProposalState::Merged, .. })),
    1
  );

  h.scheduler().run_migration(&Migration::version(3), &graph).await.unwrap();
  assert_eq!(h.attrs("numpy").attempts.len(), 1);
}
