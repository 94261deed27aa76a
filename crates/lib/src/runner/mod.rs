//! The migration runner and the working copies it edits.
//!
//! How a recipe is rewritten is not decided here. A [`MigrationRunner`] takes the
//! current recipe text and returns the new one; a [`RecipeWorkspace`] checks recipes
//! out and publishes the result to a branch.

pub mod subprocess;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::git::GitError;
use crate::graph::NodeAttrs;

pub use subprocess::SubprocessRunner;

#[derive(Debug, Error)]
pub enum RunnerError {
  #[error("failed to start migration runner: {0}")]
  Spawn(#[source] std::io::Error),

  #[error("failed to exchange data with migration runner: {0}")]
  Pipe(#[source] std::io::Error),

  #[error("migration runner exited with code {code:?}: {stderr}")]
  Failed { code: Option<i32>, stderr: String },

  #[error("failed to encode runner request: {0}")]
  Encode(#[source] serde_json::Error),

  #[error("migration runner produced invalid output: {0}")]
  InvalidOutput(#[source] serde_json::Error),

  #[error("migration failed: {0}")]
  Migration(String),
}

/// A successful rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
  pub new_recipe_source: String,
  pub commit_message: String,
  pub proposal_title: String,
  pub proposal_body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
  Changed(RunOutput),
  /// The recipe already reflects the migration.
  NoChange,
}

pub trait MigrationRunner: Send + Sync {
  fn run(&self, recipe_source: &str, node: &NodeAttrs, params: &Value) -> Result<RunOutcome, RunnerError>;
}

/// A checked-out recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
  pub feedstock: String,
  pub dir: PathBuf,
  pub recipe_source: String,
}

/// Local working copies of feedstock repositories.
///
/// Implementations mutate shared directories and must be called under the process-wide
/// git lock.
pub trait RecipeWorkspace: Send + Sync {
  fn checkout(&self, feedstock: &str) -> Result<Checkout, GitError>;

  /// Write `new_source`, commit it on `branch` and push the branch.
  fn publish(&self, checkout: &Checkout, branch: &str, new_source: &str, message: &str) -> Result<(), GitError>;
}
