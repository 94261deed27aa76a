//! A forge that never mutates anything.
//!
//! Reads are forwarded to an optional inner forge. Writes are logged and answered with
//! fabricated records so a full run can be rehearsed end to end.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use super::{Forge, ForgeError, ProposalRecord, ProposalRequest, ProposalState, Refresh};

pub struct DryRunForge {
  inner: Option<Arc<dyn Forge>>,
  next_number: AtomicU64,
}

impl DryRunForge {
  pub fn new(inner: Option<Arc<dyn Forge>>) -> Self {
    Self {
      inner,
      next_number: AtomicU64::new(1),
    }
  }
}

impl Forge for DryRunForge {
  fn create_proposal(&self, request: &ProposalRequest) -> Result<ProposalRecord, ForgeError> {
    let number = self.next_number.fetch_add(1, Ordering::Relaxed);
    info!(repo = %request.repo, head = %request.head, title = %request.title, "dry run: would open proposal");
    Ok(ProposalRecord {
      id: number,
      number,
      repo: request.repo.clone(),
      url: format!("dry-run://{}/{}", request.repo, number),
      state: ProposalState::Open,
      mergeable_state: None,
      labels: Vec::new(),
      head_ref: Some(request.head.clone()),
      created_at: None,
      last_modified: None,
    })
  }

  fn refresh(&self, proposal: &ProposalRecord) -> Result<Refresh, ForgeError> {
    match &self.inner {
      Some(inner) => inner.refresh(proposal),
      None => Ok(Refresh::NotModified),
    }
  }

  fn comment(&self, proposal: &ProposalRecord, text: &str) -> Result<(), ForgeError> {
    info!(repo = %proposal.repo, number = proposal.number, text, "dry run: would comment");
    Ok(())
  }

  fn close(&self, proposal: &ProposalRecord) -> Result<(), ForgeError> {
    info!(repo = %proposal.repo, number = proposal.number, "dry run: would close proposal");
    Ok(())
  }

  fn delete_branch(&self, proposal: &ProposalRecord) -> Result<(), ForgeError> {
    info!(repo = %proposal.repo, head = ?proposal.head_ref, "dry run: would delete branch");
    Ok(())
  }

  fn list_proposals(&self, repo: &str, state: ProposalState) -> Result<Vec<ProposalRecord>, ForgeError> {
    match &self.inner {
      Some(inner) => inner.list_proposals(repo, state),
      None => Ok(Vec::new()),
    }
  }

  fn commit_authors(&self, proposal: &ProposalRecord) -> Result<Vec<String>, ForgeError> {
    match &self.inner {
      Some(inner) => inner.commit_authors(proposal),
      None => Ok(Vec::new()),
    }
  }

  fn remaining_budget(&self) -> Result<u64, ForgeError> {
    match &self.inner {
      Some(inner) => inner.remaining_budget(),
      None => Ok(u64::MAX),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn request() -> ProposalRequest {
    ProposalRequest {
      repo: "numpy-feedstock".into(),
      base: "main".into(),
      head: "numpy-v2.0".into(),
      title: "numpy v2.0".into(),
      body: String::new(),
    }
  }

  #[test]
  fn fabricates_open_proposals_with_distinct_numbers() {
    let forge = DryRunForge::new(None);
    let a = forge.create_proposal(&request()).unwrap();
    let b = forge.create_proposal(&request()).unwrap();
    assert_eq!(a.state, ProposalState::Open);
    assert_ne!(a.number, b.number);
    assert_eq!(a.head_ref.as_deref(), Some("numpy-v2.0"));
  }

  #[test]
  fn reads_without_inner_are_empty() {
    let forge = DryRunForge::new(None);
    let record = forge.create_proposal(&request()).unwrap();
    assert_eq!(forge.refresh(&record).unwrap(), Refresh::NotModified);
    assert!(forge.list_proposals("numpy-feedstock", ProposalState::Open).unwrap().is_empty());
    assert_eq!(forge.remaining_budget().unwrap(), u64::MAX);
  }
}
