//! Walk each migration's effective graph and open at most one proposal per
//! (node, fingerprint).
//!
//! # Per-node pipeline
//!
//! 1. Fingerprint the migration for the node.
//! 2. Skip when the node's attempt history already blocks that fingerprint.
//! 3. Run the migration and publish the branch.
//! 4. Re-check the history, then open the proposal.
//! 5. Append the attempt record in one document scope.
//!
//! Nodes run on a pool of blocking workers behind a semaphore. Before each node is
//! dispatched the remaining platform API budget is checked; once it drops to the
//! reserve the rest of the batch is abandoned. A node that fails records a bot error
//! and the batch continues. A store failure ends the run.

pub mod budget;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::consts::NODE_ATTRS_NS;
use crate::forge::{Forge, ForgeError, ProposalRecord, ProposalRequest, ProposalState, RetryPolicy};
use crate::git::GitError;
use crate::graph::{AttemptRecord, BotError, FeedstockGraph, NodeAttrs, build_order};
use crate::locks::Locks;
use crate::migration::effective::Effective;
use crate::migration::{Migration, MigrationError, run_order};
use crate::runner::{MigrationRunner, RecipeWorkspace, RunOutcome, RunnerError};
use crate::store::{Document, DocumentStore, StoreError};

pub use budget::{ApiBudget, PrBudget};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
  /// Concurrent node workers.
  pub parallelism: usize,
  /// Stop dispatching once the platform reports this many calls or fewer left.
  pub api_reserve: u64,
  pub max_open_version_proposals: u32,
  /// Branch proposals target.
  pub base_branch: String,
}

impl Default for ScheduleConfig {
  fn default() -> Self {
    Self {
      parallelism: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
      api_reserve: 100,
      max_open_version_proposals: crate::migration::DEFAULT_MAX_OPEN_VERSION_PROPOSALS,
      base_branch: "main".to_string(),
    }
  }
}

#[derive(Debug, Error)]
pub enum ScheduleError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Migration(#[from] MigrationError),

  #[error("worker pool closed")]
  PoolClosed,

  #[error("worker task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
  NotApplicable,
  AlreadyAttempted,
  PrLimit,
  WaitingForUpstream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum NodeOutcome {
  Proposed { number: u64 },
  /// The platform already had an equivalent proposal.
  AlreadySatisfied,
  NoChange,
  Skipped { reason: SkipReason },
  Failed { error: String },
}

impl fmt::Display for NodeOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      NodeOutcome::Proposed { number } => write!(f, "proposed #{number}"),
      NodeOutcome::AlreadySatisfied => f.write_str("already satisfied"),
      NodeOutcome::NoChange => f.write_str("no change"),
      NodeOutcome::Skipped { reason } => write!(f, "skipped ({reason:?})"),
      NodeOutcome::Failed { error } => write!(f, "failed: {error}"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
  /// The platform API budget dropped to the reserve.
  ApiBudget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
  pub migration: String,
  pub outcomes: BTreeMap<String, NodeOutcome>,
  pub proposals_opened: u32,
  pub aborted: Option<AbortReason>,
}

impl MigrationReport {
  pub fn count(&self, pred: impl Fn(&NodeOutcome) -> bool) -> usize {
    self.outcomes.values().filter(|o| pred(o)).count()
  }
}

/// State shared by the workers of one migration.
struct MigrationRun {
  migration: Migration,
  effective: Effective,
  budget: PrBudget,
  aborted: AtomicBool,
}

#[derive(Debug, Error)]
enum AttemptError {
  #[error(transparent)]
  Store(#[from] StoreError),
  #[error(transparent)]
  Runner(#[from] RunnerError),
  #[error(transparent)]
  Git(#[from] GitError),
  #[error(transparent)]
  Forge(#[from] ForgeError),
}

#[derive(Clone)]
pub struct Scheduler {
  store: DocumentStore,
  forge: Arc<dyn Forge>,
  runner: Arc<dyn MigrationRunner>,
  workspace: Arc<dyn RecipeWorkspace>,
  locks: Locks,
  config: ScheduleConfig,
  retry: RetryPolicy,
}

impl Scheduler {
  pub fn new(
    store: DocumentStore,
    forge: Arc<dyn Forge>,
    runner: Arc<dyn MigrationRunner>,
    workspace: Arc<dyn RecipeWorkspace>,
    locks: Locks,
    config: ScheduleConfig,
  ) -> Self {
    Self {
      store,
      forge,
      runner,
      workspace,
      locks,
      config,
      retry: RetryPolicy::default(),
    }
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  /// Run every migration in run order. API budget exhaustion ends the run early.
  pub async fn run(
    &self,
    migrations: Vec<Migration>,
    graph: &FeedstockGraph,
  ) -> Result<Vec<MigrationReport>, ScheduleError> {
    let ordered = run_order(migrations, &mut rand::rng());
    let mut reports = Vec::with_capacity(ordered.len());
    for migration in &ordered {
      let report = self.run_migration(migration, graph).await?;
      let stop = report.aborted.is_some();
      reports.push(report);
      if stop {
        warn!("platform API budget exhausted, skipping remaining migrations");
        break;
      }
    }
    Ok(reports)
  }

  /// One migration over its effective graph.
  pub async fn run_migration(
    &self,
    migration: &Migration,
    graph: &FeedstockGraph,
  ) -> Result<MigrationReport, ScheduleError> {
    let name = migration.name();
    let effective = {
      let this = self.clone();
      let migration = migration.clone();
      let graph = graph.clone();
      tokio::task::spawn_blocking(move || -> Result<Effective, ScheduleError> {
        migration.save(&this.store)?;
        Ok(migration.effective(&graph, &this.store)?)
      })
      .await??
    };

    let order: Vec<String> = build_order(&effective.graph)
      .into_iter()
      .filter(|n| effective.applicable.contains(n))
      .collect();
    info!(migration = %name, nodes = order.len(), pr_limit = migration.pr_limit(), "running migration");

    let run = Arc::new(MigrationRun {
      migration: migration.clone(),
      effective,
      budget: PrBudget::new(migration.pr_limit()),
      aborted: AtomicBool::new(false),
    });
    let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
    let mut join_set = JoinSet::new();
    let mut workers = HashMap::new();

    for node in order {
      if run.aborted.load(Ordering::Acquire) {
        break;
      }
      let permit = semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ScheduleError::PoolClosed)?;
      if self.api_exhausted().await {
        run.aborted.store(true, Ordering::Release);
        break;
      }

      let this = self.clone();
      let run = run.clone();
      let worker = node.clone();
      let handle = join_set.spawn_blocking(move || {
        let _permit = permit;
        let outcome = this.process_node(&run, &worker);
        (worker, outcome)
      });
      workers.insert(handle.id(), node);
    }

    let mut outcomes = BTreeMap::new();
    let mut fatal = None;
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((node, Ok(outcome))) => {
          debug!(migration = %name, node = %node, %outcome, "node finished");
          outcomes.insert(node, outcome);
        }
        Ok((node, Err(e))) => {
          error!(migration = %name, node = %node, error = %e, "store failure, aborting run");
          fatal.get_or_insert(e);
        }
        Err(e) => {
          let Some(node) = workers.remove(&e.id()) else {
            error!(migration = %name, error = %e, "unknown node worker failed");
            continue;
          };
          error!(migration = %name, node = %node, error = %e, "node worker panicked");
          let message = format!("worker panicked: {e}");
          if let Err(e) = self.record_bot_error(migration, &node, &message).await {
            error!(migration = %name, node = %node, error = %e, "store failure, aborting run");
            fatal.get_or_insert(e);
          }
          outcomes.insert(node, NodeOutcome::Failed { error: message });
        }
      }
    }
    if let Some(e) = fatal {
      return Err(e);
    }

    let aborted = run.aborted.load(Ordering::Acquire).then_some(AbortReason::ApiBudget);
    let report = MigrationReport {
      migration: name,
      proposals_opened: run.budget.used(),
      outcomes,
      aborted,
    };
    info!(
      migration = %report.migration,
      proposals = report.proposals_opened,
      aborted = report.aborted.is_some(),
      "migration finished"
    );
    Ok(report)
  }

  async fn api_exhausted(&self) -> bool {
    let forge = self.forge.clone();
    let retry = self.retry.clone();
    let budget = ApiBudget::new(self.config.api_reserve);
    match tokio::task::spawn_blocking(move || retry.run("remaining_budget", || forge.remaining_budget())).await {
      Ok(Ok(remaining)) => {
        let exhausted = budget.is_exhausted(remaining);
        if exhausted {
          warn!(remaining, reserve = self.config.api_reserve, "platform API budget exhausted");
        }
        exhausted
      }
      Ok(Err(ForgeError::RateLimited)) => true,
      Ok(Err(e)) => {
        warn!(error = %e, "could not read platform API budget");
        false
      }
      Err(e) => {
        error!(error = %e, "budget check panicked");
        false
      }
    }
  }

  /// Mark a node whose worker died without reporting back.
  async fn record_bot_error(&self, migration: &Migration, node: &str, message: &str) -> Result<(), ScheduleError> {
    let store = self.store.clone();
    let error = BotError {
      migration: migration.name(),
      message: message.to_string(),
    };
    let node = node.to_string();
    tokio::task::spawn_blocking(move || {
      let mut doc = store.document(NODE_ATTRS_NS, &node);
      doc.modify(|a: &mut NodeAttrs| a.bot_error = Some(error))
    })
    .await??;
    Ok(())
  }

  /// Steps 1-5 for one node. Only store failures are returned as errors.
  fn process_node(&self, run: &MigrationRun, name: &str) -> Result<NodeOutcome, ScheduleError> {
    let migration = &run.migration;
    let mut doc = self.store.document(NODE_ATTRS_NS, name);
    let attrs: NodeAttrs = doc.read()?;
    doc.purge();

    if !migration.applies(&attrs) {
      return Ok(NodeOutcome::Skipped {
        reason: SkipReason::NotApplicable,
      });
    }
    let fingerprint = migration.fingerprint(&attrs);
    if attrs.has_blocking_attempt(&fingerprint) {
      debug!(node = %name, fingerprint = %fingerprint, "already attempted");
      return Ok(NodeOutcome::Skipped {
        reason: SkipReason::AlreadyAttempted,
      });
    }
    if migration.waits_for_upstream() && !self.upstream_ready(run, name, &fingerprint)? {
      return Ok(NodeOutcome::Skipped {
        reason: SkipReason::WaitingForUpstream,
      });
    }
    if !run.budget.try_reserve() {
      return Ok(NodeOutcome::Skipped {
        reason: SkipReason::PrLimit,
      });
    }

    match self.attempt(migration, &mut doc, &attrs, &fingerprint) {
      Ok(outcome) => {
        if !matches!(outcome, NodeOutcome::Proposed { .. }) {
          run.budget.release();
        }
        Ok(outcome)
      }
      Err(AttemptError::Store(e)) => {
        run.budget.release();
        Err(e.into())
      }
      Err(e) => {
        run.budget.release();
        if matches!(e, AttemptError::Forge(ForgeError::RateLimited)) {
          run.aborted.store(true, Ordering::Release);
        }
        error!(migration = %migration.name(), node = %name, error = %e, "migration failed");
        let message = e.to_string();
        doc.modify(|a: &mut NodeAttrs| {
          a.bot_error = Some(BotError {
            migration: migration.name(),
            message: message.clone(),
          });
        })?;
        Ok(NodeOutcome::Failed { error: message })
      }
    }
  }

  fn attempt(
    &self,
    migration: &Migration,
    doc: &mut Document,
    attrs: &NodeAttrs,
    fingerprint: &str,
  ) -> Result<NodeOutcome, AttemptError> {
    let name = attrs.name.as_str();
    let checkout = {
      let _git = self.locks.git();
      self.workspace.checkout(name)?
    };

    let params = migration.params(attrs);
    let output = match self.runner.run(&checkout.recipe_source, attrs, &params)? {
      RunOutcome::NoChange => {
        info!(migration = %migration.name(), node = %name, "nothing to change");
        record_attempt(doc, migration, fingerprint, None)?;
        return Ok(NodeOutcome::NoChange);
      }
      RunOutcome::Changed(output) => output,
    };

    let branch = migration.branch_name(attrs);
    {
      let _git = self.locks.git();
      self
        .workspace
        .publish(&checkout, &branch, &output.new_recipe_source, &output.commit_message)?;
    }

    // Another process may have opened the proposal meanwhile.
    let fresh: NodeAttrs = doc.read()?;
    doc.purge();
    if fresh.has_blocking_attempt(fingerprint) {
      warn!(node = %name, fingerprint, "attempt recorded concurrently, not opening proposal");
      return Ok(NodeOutcome::Skipped {
        reason: SkipReason::AlreadyAttempted,
      });
    }

    let request = ProposalRequest {
      repo: format!("{name}-feedstock"),
      base: self.config.base_branch.clone(),
      head: branch,
      title: output.proposal_title,
      body: output.proposal_body,
    };
    match self.retry.run("create_proposal", || self.forge.create_proposal(&request)) {
      Ok(record) => {
        let number = record.number;
        info!(migration = %migration.name(), node = %name, number, "opened proposal");
        record_attempt(doc, migration, fingerprint, Some(record))?;
        Ok(NodeOutcome::Proposed { number })
      }
      Err(ForgeError::Duplicate { existing, .. }) => {
        info!(migration = %migration.name(), node = %name, "proposal already exists");
        record_attempt(doc, migration, fingerprint, existing.map(|b| *b))?;
        Ok(NodeOutcome::AlreadySatisfied)
      }
      Err(e) => Err(e.into()),
    }
  }

  /// Whether every applicable dependency already merged this fingerprint.
  fn upstream_ready(&self, run: &MigrationRun, name: &str, fingerprint: &str) -> Result<bool, StoreError> {
    for pred in run.effective.graph.predecessors(name) {
      if pred == name || !run.effective.applicable.contains(pred) {
        continue;
      }
      let attrs: NodeAttrs = self.store.document(NODE_ATTRS_NS, pred).read()?;
      if attrs.archived {
        continue;
      }
      if !attrs.attempts_for(fingerprint).any(|a| a.state() == ProposalState::Merged) {
        debug!(node = %name, waiting_on = %pred, "upstream not merged yet");
        return Ok(false);
      }
    }
    Ok(true)
  }
}

/// Append an attempt record; the only write path for attempt history.
fn record_attempt(
  doc: &mut Document,
  migration: &Migration,
  fingerprint: &str,
  proposal: Option<ProposalRecord>,
) -> Result<(), StoreError> {
  let record = AttemptRecord {
    fingerprint: fingerprint.to_string(),
    migrator_name: migration.name(),
    migrator_version: migration.migrator_version(),
    proposal,
    rerun: false,
    created_at: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
  };
  doc.modify(|attrs: &mut NodeAttrs| {
    attrs.attempts.push(record);
    attrs.bot_error = None;
  })?;
  Ok(())
}
