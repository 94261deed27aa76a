//! Publish changed store documents to the git remote backing the store.
//!
//! Changed files are committed in batches of at most `batch_size` paths and pushed.
//! A rejected push pulls with rebase and tries again; once the attempts run out the
//! deploy fails, since the run's state could not be committed.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::git::{Git, GitError};

/// Local files in the store root that are never committed.
const LOCAL_ONLY: [&str; 1] = [crate::locks::LOCK_FILENAME];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
  /// Files per commit.
  pub batch_size: usize,
  pub max_push_attempts: u32,
  pub remote: String,
  pub branch: String,
}

impl Default for DeployConfig {
  fn default() -> Self {
    Self {
      batch_size: 200,
      max_push_attempts: 5,
      remote: "origin".to_string(),
      branch: "main".to_string(),
    }
  }
}

#[derive(Debug, Error)]
pub enum DeployError {
  #[error(transparent)]
  Git(#[from] GitError),

  #[error("push still rejected after {attempts} attempts: {last}")]
  PushExhausted {
    attempts: u32,
    #[source]
    last: GitError,
  },
}

/// The repository operations a deploy needs.
pub trait DeployRepo {
  fn changed_paths(&self) -> Result<Vec<String>, GitError>;
  fn stage(&self, paths: &[&str]) -> Result<(), GitError>;
  fn commit(&self, message: &str) -> Result<(), GitError>;
  fn push(&self, remote: &str, branch: &str) -> Result<(), GitError>;
  fn pull_rebase(&self, remote: &str, branch: &str) -> Result<(), GitError>;
}

impl DeployRepo for Git {
  fn changed_paths(&self) -> Result<Vec<String>, GitError> {
    Git::changed_paths(self)
  }

  fn stage(&self, paths: &[&str]) -> Result<(), GitError> {
    self.add(paths)
  }

  fn commit(&self, message: &str) -> Result<(), GitError> {
    Git::commit(self, message)
  }

  fn push(&self, remote: &str, branch: &str) -> Result<(), GitError> {
    Git::push(self, remote, branch)
  }

  fn pull_rebase(&self, remote: &str, branch: &str) -> Result<(), GitError> {
    Git::pull_rebase(self, remote, branch)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReport {
  pub files: usize,
  pub commits: usize,
  pub push_attempts: u32,
}

/// Commit everything changed in `repo` and push it.
pub fn deploy(repo: &dyn DeployRepo, config: &DeployConfig, message: &str) -> Result<DeployReport, DeployError> {
  let mut paths = repo.changed_paths()?;
  paths.retain(|p| !LOCAL_ONLY.contains(&p.as_str()));
  if paths.is_empty() {
    info!("nothing to deploy");
    return Ok(DeployReport::default());
  }

  let batch_size = config.batch_size.max(1);
  let batches = paths.len().div_ceil(batch_size);
  for (i, chunk) in paths.chunks(batch_size).enumerate() {
    let chunk: Vec<&str> = chunk.iter().map(String::as_str).collect();
    repo.stage(&chunk)?;
    let message = if batches > 1 {
      format!("{message} ({}/{batches})", i + 1)
    } else {
      message.to_string()
    };
    repo.commit(&message)?;
  }

  let push_attempts = push_with_rebase(repo, config)?;
  info!(files = paths.len(), commits = batches, push_attempts, "deployed store changes");
  Ok(DeployReport {
    files: paths.len(),
    commits: batches,
    push_attempts,
  })
}

fn push_with_rebase(repo: &dyn DeployRepo, config: &DeployConfig) -> Result<u32, DeployError> {
  let attempts = config.max_push_attempts.max(1);
  let mut attempt = 1;
  loop {
    match repo.push(&config.remote, &config.branch) {
      Ok(()) => return Ok(attempt),
      Err(e) if e.is_push_rejection() && attempt < attempts => {
        warn!(attempt, error = %e, "push rejected, rebasing onto remote");
        repo.pull_rebase(&config.remote, &config.branch)?;
        attempt += 1;
      }
      Err(e) if e.is_push_rejection() => return Err(DeployError::PushExhausted { attempts, last: e }),
      Err(e) => return Err(e.into()),
    }
  }
}
