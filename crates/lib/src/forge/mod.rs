//! The collaboration platform proposals are opened on.
//!
//! Only the contract lives here: the tracked fields of a proposal, the operations the
//! scheduler and reconciler need, and how failures are classified for retry. Wire
//! formats belong to implementations.

pub mod dry_run;
pub mod retry;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use dry_run::DryRunForge;
pub use retry::RetryPolicy;

/// Lifecycle of a proposal: `open -> {open, merged, closed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalState {
  Open,
  /// Closed with its changes merged.
  Merged,
  /// Closed without merging.
  Closed,
}

impl ProposalState {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, ProposalState::Open)
  }
}

impl fmt::Display for ProposalState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ProposalState::Open => f.write_str("open"),
      ProposalState::Merged => f.write_str("merged"),
      ProposalState::Closed => f.write_str("closed"),
    }
  }
}

/// Merge status value the platform reports for a proposal with conflicts.
pub const MERGEABLE_DIRTY: &str = "dirty";

/// The fields of a platform proposal this system tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalRecord {
  pub id: u64,
  pub number: u64,
  pub repo: String,
  #[serde(default)]
  pub url: String,
  pub state: ProposalState,
  #[serde(default)]
  pub mergeable_state: Option<String>,
  #[serde(default)]
  pub labels: Vec<String>,
  /// Source branch; cleared once the remote branch is deleted.
  #[serde(default)]
  pub head_ref: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  /// Freshness marker for conditional refreshes (an ETag or last-modified value).
  #[serde(default)]
  pub last_modified: Option<String>,
}

impl ProposalRecord {
  pub fn has_label(&self, label: &str) -> bool {
    self.labels.iter().any(|l| l == label)
  }

  pub fn has_conflicts(&self) -> bool {
    self.mergeable_state.as_deref() == Some(MERGEABLE_DIRTY)
  }
}

/// What to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalRequest {
  pub repo: String,
  pub base: String,
  pub head: String,
  pub title: String,
  pub body: String,
}

/// Result of a conditional refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refresh {
  /// The freshness marker still matches.
  NotModified,
  Updated(ProposalRecord),
}

#[derive(Debug, Error)]
pub enum ForgeError {
  /// Timeouts, connection resets, 5xx responses.
  #[error("transient platform error: {0}")]
  Transient(String),

  #[error("platform rate limit hit")]
  RateLimited,

  /// An equivalent proposal already exists.
  #[error("proposal already exists for {repo}")]
  Duplicate {
    repo: String,
    existing: Option<Box<ProposalRecord>>,
  },

  #[error("repository not found: {0}")]
  RepoNotFound(String),

  #[error("platform request failed: {0}")]
  Api(String),
}

impl ForgeError {
  /// Whether retrying the same call may succeed.
  pub fn is_transient(&self) -> bool {
    matches!(self, ForgeError::Transient(_) | ForgeError::RateLimited)
  }
}

/// Operations consumed from the collaboration platform.
pub trait Forge: Send + Sync {
  fn create_proposal(&self, request: &ProposalRequest) -> Result<ProposalRecord, ForgeError>;

  /// Fetch the current state, conditional on `proposal.last_modified`.
  fn refresh(&self, proposal: &ProposalRecord) -> Result<Refresh, ForgeError>;

  fn comment(&self, proposal: &ProposalRecord, text: &str) -> Result<(), ForgeError>;

  fn close(&self, proposal: &ProposalRecord) -> Result<(), ForgeError>;

  /// Delete the proposal's head branch. A branch that is already gone is not an error.
  fn delete_branch(&self, proposal: &ProposalRecord) -> Result<(), ForgeError>;

  fn list_proposals(&self, repo: &str, state: ProposalState) -> Result<Vec<ProposalRecord>, ForgeError>;

  /// Logins of every commit author on the proposal.
  fn commit_authors(&self, proposal: &ProposalRecord) -> Result<Vec<String>, ForgeError>;

  /// Remaining API calls in the current rate-limit window.
  fn remaining_budget(&self) -> Result<u64, ForgeError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_open_is_non_terminal() {
    assert!(!ProposalState::Open.is_terminal());
    assert!(ProposalState::Merged.is_terminal());
    assert!(ProposalState::Closed.is_terminal());
  }

  #[test]
  fn state_serializes_lowercase() {
    assert_eq!(serde_json::to_string(&ProposalState::Merged).unwrap(), "\"merged\"");
  }

  #[test]
  fn transient_classification() {
    assert!(ForgeError::Transient("timeout".into()).is_transient());
    assert!(ForgeError::RateLimited.is_transient());
    assert!(!ForgeError::RepoNotFound("x".into()).is_transient());
    assert!(
      !ForgeError::Duplicate {
        repo: "x".into(),
        existing: None
      }
      .is_transient()
    );
  }
}
