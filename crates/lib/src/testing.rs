//! In-memory stand-ins for the platform, the migration runner and the recipe
//! workspace, for driving the scheduler and reconciler in tests and dry runs.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::forge::{Forge, ForgeError, ProposalRecord, ProposalRequest, ProposalState, Refresh};
use crate::git::GitError;
use crate::graph::NodeAttrs;
use crate::runner::{Checkout, MigrationRunner, RecipeWorkspace, RunOutcome, RunOutput, RunnerError};

#[derive(Debug, Default)]
struct ForgeState {
  proposals: BTreeMap<u64, ProposalRecord>,
  authors: BTreeMap<u64, Vec<String>>,
  next: u64,
  revision: u64,
  created: Vec<ProposalRequest>,
  comments: Vec<(u64, String)>,
  closed: Vec<u64>,
  deleted_branches: Vec<u64>,
  refreshes: usize,
  create_failures: VecDeque<ForgeError>,
  refresh_failures: VecDeque<ForgeError>,
  calls: BTreeMap<&'static str, usize>,
  scheduled: BTreeMap<(&'static str, usize), ForgeError>,
  budget: u64,
}

impl ForgeState {
  /// Count a call to `op` and fail it if a failure was scheduled for this call.
  fn call(&mut self, op: &'static str) -> Result<(), ForgeError> {
    let n = self.calls.entry(op).or_insert(0);
    *n += 1;
    let n = *n;
    match self.scheduled.remove(&(op, n)) {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }

  fn touch(&mut self, id: u64) {
    self.revision += 1;
    let marker = format!("r{}", self.revision);
    if let Some(p) = self.proposals.get_mut(&id) {
      p.last_modified = Some(marker);
    }
  }
}

/// A platform held in memory. Every call is recorded for inspection.
#[derive(Debug)]
pub struct MemoryForge {
  state: Mutex<ForgeState>,
}

impl Default for MemoryForge {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryForge {
  pub fn new() -> Self {
    Self {
      state: Mutex::new(ForgeState {
        next: 1,
        budget: 5000,
        ..ForgeState::default()
      }),
    }
  }

  /// Seed an existing proposal; its id and number are kept.
  pub fn insert(&self, record: ProposalRecord) {
    let mut state = self.state.lock();
    state.next = state.next.max(record.id + 1);
    state.proposals.insert(record.id, record);
  }

  pub fn proposal(&self, id: u64) -> Option<ProposalRecord> {
    self.state.lock().proposals.get(&id).cloned()
  }

  pub fn set_state(&self, id: u64, to: ProposalState) {
    let mut state = self.state.lock();
    if let Some(p) = state.proposals.get_mut(&id) {
      p.state = to;
    }
    state.touch(id);
  }

  pub fn add_label(&self, id: u64, label: &str) {
    let mut state = self.state.lock();
    if let Some(p) = state.proposals.get_mut(&id) {
      p.labels.push(label.to_string());
    }
    state.touch(id);
  }

  pub fn set_mergeable_state(&self, id: u64, mergeable: &str) {
    let mut state = self.state.lock();
    if let Some(p) = state.proposals.get_mut(&id) {
      p.mergeable_state = Some(mergeable.to_string());
    }
    state.touch(id);
  }

  pub fn set_authors(&self, id: u64, authors: &[&str]) {
    self
      .state
      .lock()
      .authors
      .insert(id, authors.iter().map(|a| a.to_string()).collect());
  }

  pub fn set_budget(&self, remaining: u64) {
    self.state.lock().budget = remaining;
  }

  /// The next `create_proposal` call fails with `err`.
  pub fn fail_next_create(&self, err: ForgeError) {
    self.state.lock().create_failures.push_back(err);
  }

  /// The next `refresh` call fails with `err`.
  pub fn fail_next_refresh(&self, err: ForgeError) {
    self.state.lock().refresh_failures.push_back(err);
  }

  /// Fail the `nth` call (1-based) to `op`, one of `refresh`, `comment`, `close` or
  /// `delete_branch`. The call has no effect.
  pub fn fail_call(&self, op: &'static str, nth: usize, err: ForgeError) {
    self.state.lock().scheduled.insert((op, nth), err);
  }

  pub fn created(&self) -> Vec<ProposalRequest> {
    self.state.lock().created.clone()
  }

  pub fn comments(&self) -> Vec<(u64, String)> {
    self.state.lock().comments.clone()
  }

  pub fn closed(&self) -> Vec<u64> {
    self.state.lock().closed.clone()
  }

  pub fn deleted_branches(&self) -> Vec<u64> {
    self.state.lock().deleted_branches.clone()
  }

  pub fn refreshes(&self) -> usize {
    self.state.lock().refreshes
  }

  fn known(state: &ForgeState, id: u64) -> Result<&ProposalRecord, ForgeError> {
    state
      .proposals
      .get(&id)
      .ok_or_else(|| ForgeError::Api(format!("no proposal with id {id}")))
  }
}

impl Forge for MemoryForge {
  fn create_proposal(&self, request: &ProposalRequest) -> Result<ProposalRecord, ForgeError> {
    let mut state = self.state.lock();
    if let Some(err) = state.create_failures.pop_front() {
      return Err(err);
    }
    let head = Some(request.head.as_str());
    if let Some(existing) = state
      .proposals
      .values()
      .find(|p| p.repo == request.repo && p.head_ref.as_deref() == head && p.state == ProposalState::Open)
    {
      return Err(ForgeError::Duplicate {
        repo: request.repo.clone(),
        existing: Some(Box::new(existing.clone())),
      });
    }

    let id = state.next;
    state.next += 1;
    let record = ProposalRecord {
      id,
      number: id,
      repo: request.repo.clone(),
      url: format!("https://forge.invalid/{}/pull/{id}", request.repo),
      state: ProposalState::Open,
      mergeable_state: None,
      labels: Vec::new(),
      head_ref: Some(request.head.clone()),
      created_at: None,
      last_modified: None,
    };
    state.created.push(request.clone());
    state.proposals.insert(id, record);
    state.touch(id);
    Self::known(&state, id).cloned()
  }

  fn refresh(&self, proposal: &ProposalRecord) -> Result<Refresh, ForgeError> {
    let mut state = self.state.lock();
    state.refreshes += 1;
    if let Some(err) = state.refresh_failures.pop_front() {
      return Err(err);
    }
    state.call("refresh")?;
    let current = Self::known(&state, proposal.id)?;
    if current.last_modified.is_some() && current.last_modified == proposal.last_modified {
      return Ok(Refresh::NotModified);
    }
    Ok(Refresh::Updated(current.clone()))
  }

  fn comment(&self, proposal: &ProposalRecord, text: &str) -> Result<(), ForgeError> {
    let mut state = self.state.lock();
    Self::known(&state, proposal.id)?;
    state.call("comment")?;
    state.comments.push((proposal.id, text.to_string()));
    Ok(())
  }

  fn close(&self, proposal: &ProposalRecord) -> Result<(), ForgeError> {
    let mut state = self.state.lock();
    state.call("close")?;
    if let Some(p) = state.proposals.get_mut(&proposal.id) {
      p.state = ProposalState::Closed;
    } else {
      return Err(ForgeError::Api(format!("no proposal with id {}", proposal.id)));
    }
    state.closed.push(proposal.id);
    state.touch(proposal.id);
    Ok(())
  }

  fn delete_branch(&self, proposal: &ProposalRecord) -> Result<(), ForgeError> {
    let mut state = self.state.lock();
    state.call("delete_branch")?;
    if let Some(p) = state.proposals.get_mut(&proposal.id) {
      p.head_ref = None;
    } else {
      return Err(ForgeError::Api(format!("no proposal with id {}", proposal.id)));
    }
    state.deleted_branches.push(proposal.id);
    state.touch(proposal.id);
    Ok(())
  }

  fn list_proposals(&self, repo: &str, state: ProposalState) -> Result<Vec<ProposalRecord>, ForgeError> {
    Ok(
      self
        .state
        .lock()
        .proposals
        .values()
        .filter(|p| p.repo == repo && p.state == state)
        .cloned()
        .collect(),
    )
  }

  fn commit_authors(&self, proposal: &ProposalRecord) -> Result<Vec<String>, ForgeError> {
    Ok(self.state.lock().authors.get(&proposal.id).cloned().unwrap_or_default())
  }

  fn remaining_budget(&self) -> Result<u64, ForgeError> {
    Ok(self.state.lock().budget)
  }
}

type RunFn = dyn Fn(&str, &NodeAttrs, &Value) -> Result<RunOutcome, RunnerError> + Send + Sync;

/// A migration runner backed by a closure.
pub struct StaticRunner {
  run: Box<RunFn>,
  failing: BTreeSet<String>,
  calls: AtomicUsize,
}

impl StaticRunner {
  pub fn new(run: impl Fn(&str, &NodeAttrs, &Value) -> Result<RunOutcome, RunnerError> + Send + Sync + 'static) -> Self {
    Self {
      run: Box::new(run),
      failing: BTreeSet::new(),
      calls: AtomicUsize::new(0),
    }
  }

  /// Appends a marker line to every recipe.
  pub fn changed() -> Self {
    Self::new(|source, node, params| {
      let migration = params
        .pointer("/migration/name")
        .and_then(Value::as_str)
        .unwrap_or("migration")
        .to_string();
      Ok(RunOutcome::Changed(RunOutput {
        new_recipe_source: format!("{source}# {migration}\n"),
        commit_message: format!("MNT: {migration}"),
        proposal_title: format!("{}: {migration}", node.name),
        proposal_body: format!("Automated {migration} for {}.", node.name),
      }))
    })
  }

  pub fn no_change() -> Self {
    Self::new(|_, _, _| Ok(RunOutcome::NoChange))
  }

  /// Fail whenever the node is `name`.
  pub fn failing_for(mut self, name: &str) -> Self {
    self.failing.insert(name.to_string());
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::Relaxed)
  }
}

impl MigrationRunner for StaticRunner {
  fn run(&self, recipe_source: &str, node: &NodeAttrs, params: &Value) -> Result<RunOutcome, RunnerError> {
    self.calls.fetch_add(1, Ordering::Relaxed);
    if self.failing.contains(&node.name) {
      return Err(RunnerError::Migration(format!("recipe for {} could not be migrated", node.name)));
    }
    (self.run)(recipe_source, node, params)
  }
}

/// Recipes kept in memory; published branches are recorded instead of pushed.
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
  recipes: Mutex<BTreeMap<String, String>>,
  published: Mutex<Vec<(String, String, String)>>,
  missing: Mutex<BTreeSet<String>>,
}

impl MemoryWorkspace {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_recipe(self, feedstock: &str, source: &str) -> Self {
    self.recipes.lock().insert(feedstock.to_string(), source.to_string());
    self
  }

  /// Checking out `feedstock` fails as if the repository were gone.
  pub fn without_repo(self, feedstock: &str) -> Self {
    self.missing.lock().insert(feedstock.to_string());
    self
  }

  /// `(feedstock, branch, new source)` for every publish.
  pub fn published(&self) -> Vec<(String, String, String)> {
    self.published.lock().clone()
  }
}

impl RecipeWorkspace for MemoryWorkspace {
  fn checkout(&self, feedstock: &str) -> Result<Checkout, GitError> {
    if self.missing.lock().contains(feedstock) {
      return Err(GitError::Failed {
        args: format!("clone {feedstock}-feedstock"),
        code: Some(128),
        stderr: "fatal: repository not found".to_string(),
      });
    }
    let recipe_source = self
      .recipes
      .lock()
      .get(feedstock)
      .cloned()
      .unwrap_or_else(|| format!("package:\n  name: {feedstock}\n"));
    Ok(Checkout {
      feedstock: feedstock.to_string(),
      dir: PathBuf::from(format!("{feedstock}-feedstock")),
      recipe_source,
    })
  }

  fn publish(&self, checkout: &Checkout, branch: &str, new_source: &str, _message: &str) -> Result<(), GitError> {
    self.recipes.lock().insert(checkout.feedstock.clone(), new_source.to_string());
    self
      .published
      .lock()
      .push((checkout.feedstock.clone(), branch.to_string(), new_source.to_string()));
    Ok(())
  }
}
