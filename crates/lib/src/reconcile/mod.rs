//! Track proposals opened by the scheduler until they reach a terminal state.
//!
//! Each open proposal is refreshed with a conditional request keyed on its stored
//! freshness marker. On top of the plain `open -> {merged, closed}` transitions two
//! forced closes exist:
//!
//! - a proposal labelled with the rerun label is commented on, closed and its branch
//!   deleted;
//! - a proposal with merge conflicts whose commits all come from the bot is closed so
//!   it can be regenerated.
//!
//! Both set the rerun marker on the attempt, which frees its fingerprint for the
//! scheduler. A unit of work (one proposal, or one feedstock refresh) is retried as a
//! whole; individual platform calls inside it are not.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::consts::{DEFAULT_BOT_LOGIN, DEFAULT_RERUN_LABEL, NODE_ATTRS_NS};
use crate::forge::{Forge, ForgeError, ProposalRecord, ProposalState, Refresh};
use crate::graph::NodeAttrs;
use crate::store::{DocumentStore, StoreError};

const RERUN_COMMENT: &str = "Closing this proposal because a rerun was requested. A new one will be opened \
                             from the current state of the feedstock.";

const CONFLICT_COMMENT: &str = "Closing this proposal because it has merge conflicts and only contains bot \
                                commits. It will be regenerated on a later run.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
  /// Whole-unit attempts before an error is raised.
  pub max_attempts: u32,
  pub rerun_label: String,
  /// Commits by this login count as the bot's own.
  pub bot_login: String,
}

impl Default for ReconcileConfig {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      rerun_label: DEFAULT_RERUN_LABEL.to_string(),
      bot_login: DEFAULT_BOT_LOGIN.to_string(),
    }
  }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("reconciling {node} failed after {attempts} attempts: {source}")]
  Forge {
    node: String,
    attempts: u32,
    #[source]
    source: ForgeError,
  },
}

/// What reconciling one proposal did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "transition")]
pub enum Transition {
  /// The freshness marker matched.
  NotModified,
  /// New data, same state.
  Refreshed,
  StateChanged { from: ProposalState, to: ProposalState },
  /// Closed on request; the fingerprint is free again.
  Rerun,
  /// Closed for conflicts; the fingerprint is free again.
  ConflictClosed,
}

impl Transition {
  fn writes(&self) -> bool {
    !matches!(self, Transition::NotModified)
  }

  fn marks_rerun(&self) -> bool {
    matches!(self, Transition::Rerun | Transition::ConflictClosed)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
  /// Transitions per node, keyed by proposal number.
  pub nodes: BTreeMap<String, BTreeMap<u64, Transition>>,
  /// Nodes whose reconciliation failed, with the error.
  pub failed: BTreeMap<String, String>,
}

impl ReconcileReport {
  pub fn count(&self, pred: impl Fn(&Transition) -> bool) -> usize {
    self.nodes.values().flat_map(|t| t.values()).filter(|t| pred(t)).count()
  }
}

struct Reconciled {
  record: ProposalRecord,
  transition: Transition,
}

pub struct Reconciler {
  store: DocumentStore,
  forge: Arc<dyn Forge>,
  config: ReconcileConfig,
}

impl Reconciler {
  pub fn new(store: DocumentStore, forge: Arc<dyn Forge>, config: ReconcileConfig) -> Self {
    Self { store, forge, config }
  }

  /// Reconcile every node with open proposals. Platform failures are reported per
  /// node; store failures end the pass.
  pub fn reconcile_all(&self) -> Result<ReconcileReport, ReconcileError> {
    let mut report = ReconcileReport::default();
    for name in self.store.list_keys(NODE_ATTRS_NS)? {
      match self.reconcile_node(&name) {
        Ok(transitions) if transitions.is_empty() => {}
        Ok(transitions) => {
          report.nodes.insert(name, transitions);
        }
        Err(ReconcileError::Store(e)) => return Err(e.into()),
        Err(e) => {
          error!(node = %name, error = %e, "reconciliation failed");
          report.failed.insert(name, e.to_string());
        }
      }
    }
    info!(
      nodes = report.nodes.len(),
      reruns = report.count(|t| *t == Transition::Rerun),
      conflicts = report.count(|t| *t == Transition::ConflictClosed),
      failed = report.failed.len(),
      "reconciliation finished"
    );
    Ok(report)
  }

  /// Reconcile each open proposal of one node, one unit per proposal.
  pub fn reconcile_node(&self, name: &str) -> Result<BTreeMap<u64, Transition>, ReconcileError> {
    let mut transitions = BTreeMap::new();
    for proposal in self.open_proposals(name)? {
      let reconciled = self.with_unit_retry(name, || self.reconcile_proposal(&proposal))?;
      if reconciled.transition.writes() {
        self.store_record(name, proposal.id, &reconciled)?;
      }
      debug!(node = %name, number = proposal.number, transition = ?reconciled.transition, "reconciled proposal");
      transitions.insert(proposal.number, reconciled.transition);
    }
    Ok(transitions)
  }

  /// Refresh every open proposal of one feedstock after a push, as one unit.
  ///
  /// Returns how many records changed.
  pub fn refresh_feedstock(&self, name: &str) -> Result<usize, ReconcileError> {
    let open = self.open_proposals(name)?;
    let updated = self.with_unit_retry(name, || {
      let mut updated = Vec::new();
      for proposal in &open {
        if let Refresh::Updated(record) = self.forge.refresh(proposal)? {
          updated.push(record);
        }
      }
      Ok(updated)
    })?;
    if updated.is_empty() {
      return Ok(0);
    }

    let mut doc = self.store.document(NODE_ATTRS_NS, name);
    doc.modify(|attrs: &mut NodeAttrs| {
      for record in &updated {
        if let Some(slot) = attrs
          .attempts
          .iter_mut()
          .filter_map(|a| a.proposal.as_mut())
          .find(|p| p.id == record.id)
        {
          *slot = record.clone();
        }
      }
    })?;
    info!(node = %name, updated = updated.len(), "refreshed feedstock proposals");
    Ok(updated.len())
  }

  fn open_proposals(&self, name: &str) -> Result<Vec<ProposalRecord>, StoreError> {
    let attrs: NodeAttrs = self.store.document(NODE_ATTRS_NS, name).read()?;
    Ok(
      attrs
        .attempts
        .into_iter()
        .filter_map(|a| a.proposal)
        .filter(|p| p.state == ProposalState::Open)
        .collect(),
    )
  }

  fn with_unit_retry<T>(&self, node: &str, mut unit: impl FnMut() -> Result<T, ForgeError>) -> Result<T, ReconcileError> {
    let attempts = self.config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
      match unit() {
        Ok(out) => return Ok(out),
        Err(e) if attempt < attempts => {
          warn!(node, attempt, error = %e, "retrying reconciliation unit");
          attempt += 1;
        }
        Err(source) => {
          return Err(ReconcileError::Forge {
            node: node.to_string(),
            attempts,
            source,
          });
        }
      }
    }
  }

  fn reconcile_proposal(&self, proposal: &ProposalRecord) -> Result<Reconciled, ForgeError> {
    let (current, modified) = match self.forge.refresh(proposal)? {
      Refresh::NotModified => (proposal.clone(), false),
      Refresh::Updated(record) => (record, true),
    };

    // A retried unit may find the proposal already closed by its own earlier attempt,
    // so forced closes key on the label or conflict rather than on the open state.
    let forceable = current.state != ProposalState::Merged;

    if forceable && current.has_label(&self.config.rerun_label) {
      info!(repo = %current.repo, number = current.number, "rerun requested, closing proposal");
      self.close_once(&current, RERUN_COMMENT)?;
      if current.head_ref.is_some() {
        self.forge.delete_branch(&current)?;
      }
      let mut record = self.final_refresh(current)?;
      record.head_ref = None;
      return Ok(Reconciled {
        record,
        transition: Transition::Rerun,
      });
    }

    if forceable && current.has_conflicts() && self.only_bot_commits(&current)? {
      info!(repo = %current.repo, number = current.number, "closing conflicted bot proposal");
      self.close_once(&current, CONFLICT_COMMENT)?;
      let record = self.final_refresh(current)?;
      return Ok(Reconciled {
        record,
        transition: Transition::ConflictClosed,
      });
    }

    let transition = if !modified {
      Transition::NotModified
    } else if current.state != proposal.state {
      info!(repo = %current.repo, number = current.number, from = %proposal.state, to = %current.state, "proposal changed state");
      Transition::StateChanged {
        from: proposal.state,
        to: current.state,
      }
    } else {
      Transition::Refreshed
    };
    Ok(Reconciled {
      record: current,
      transition,
    })
  }

  /// Comment and close, unless an earlier try of the same unit already closed it.
  fn close_once(&self, current: &ProposalRecord, comment: &str) -> Result<(), ForgeError> {
    if current.state != ProposalState::Open {
      return Ok(());
    }
    self.forge.comment(current, comment)?;
    self.forge.close(current)
  }

  /// Re-read a proposal the bot just closed. A closed proposal is never left open.
  fn final_refresh(&self, current: ProposalRecord) -> Result<ProposalRecord, ForgeError> {
    let mut record = match self.forge.refresh(&current)? {
      Refresh::NotModified => current,
      Refresh::Updated(record) => record,
    };
    if record.state == ProposalState::Open {
      record.state = ProposalState::Closed;
    }
    Ok(record)
  }

  fn only_bot_commits(&self, proposal: &ProposalRecord) -> Result<bool, ForgeError> {
    let authors = self.forge.commit_authors(proposal)?;
    Ok(!authors.is_empty() && authors.iter().all(|a| *a == self.config.bot_login))
  }

  fn store_record(&self, name: &str, id: u64, reconciled: &Reconciled) -> Result<(), StoreError> {
    let mut doc = self.store.document(NODE_ATTRS_NS, name);
    doc.modify(|attrs: &mut NodeAttrs| {
      if let Some(attempt) = attrs
        .attempts
        .iter_mut()
        .find(|a| a.proposal.as_ref().is_some_and(|p| p.id == id))
      {
        attempt.proposal = Some(reconciled.record.clone());
        if reconciled.transition.marks_rerun() {
          attempt.rerun = true;
        }
      }
    })?;
    Ok(())
  }
}
