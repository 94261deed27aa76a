//! Thin wrapper over the `git` executable, and the feedstock working copies built on it.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{debug, info};

use crate::locks::Locks;
use crate::runner::{Checkout, RecipeWorkspace};

#[derive(Debug, Error)]
pub enum GitError {
  #[error("failed to run git: {0}")]
  Spawn(#[source] std::io::Error),

  #[error("git {args} failed with exit code {code:?}: {stderr}")]
  Failed {
    args: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("failed to access {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl GitError {
  /// Whether a push was rejected because the remote moved on.
  pub fn is_push_rejection(&self) -> bool {
    match self {
      GitError::Failed { stderr, .. } => {
        stderr.contains("[rejected]") || stderr.contains("non-fast-forward") || stderr.contains("fetch first")
      }
      _ => false,
    }
  }
}

/// A repository directory operated on by the `git` binary.
#[derive(Debug, Clone)]
pub struct Git {
  dir: PathBuf,
}

impl Git {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// Run `git <args>` in the repository and return trimmed stdout.
  pub fn run(&self, args: &[&str]) -> Result<String, GitError> {
    self.run_raw(args).map(|out| out.trim().to_string())
  }

  fn run_raw(&self, args: &[&str]) -> Result<String, GitError> {
    debug!(dir = %self.dir.display(), args = ?args, "git");
    let output = Command::new("git")
      .args(args)
      .current_dir(&self.dir)
      .env("GIT_TERMINAL_PROMPT", "0")
      .output()
      .map_err(GitError::Spawn)?;

    if !output.status.success() {
      return Err(GitError::Failed {
        args: args.join(" "),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
  }

  pub fn clone_into(url: &str, dir: &Path) -> Result<Self, GitError> {
    let parent = dir.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent).map_err(|source| GitError::Io {
      path: parent.to_path_buf(),
      source,
    })?;
    let target = dir.to_string_lossy();
    Git::new(parent).run(&["clone", "--quiet", url, &target])?;
    Ok(Self::new(dir))
  }

  pub fn init(dir: &Path) -> Result<Self, GitError> {
    std::fs::create_dir_all(dir).map_err(|source| GitError::Io {
      path: dir.to_path_buf(),
      source,
    })?;
    let git = Self::new(dir);
    git.run(&["init", "--quiet"])?;
    Ok(git)
  }

  /// Paths with uncommitted changes, relative to the repository root.
  pub fn changed_paths(&self) -> Result<Vec<String>, GitError> {
    // Porcelain lines start with a two-column status that may begin with a space.
    let out = self.run_raw(&["status", "--porcelain", "--untracked-files=all"])?;
    Ok(
      out
        .lines()
        .filter_map(|line| line.get(3..))
        .map(|p| p.trim_matches('"').to_string())
        .collect(),
    )
  }

  pub fn add(&self, paths: &[&str]) -> Result<(), GitError> {
    let mut args = vec!["add", "--"];
    args.extend_from_slice(paths);
    self.run(&args).map(|_| ())
  }

  pub fn commit(&self, message: &str) -> Result<(), GitError> {
    self.run(&["commit", "--quiet", "--no-verify", "-m", message]).map(|_| ())
  }

  pub fn push(&self, remote: &str, branch: &str) -> Result<(), GitError> {
    self.run(&["push", "--quiet", remote, branch]).map(|_| ())
  }

  pub fn pull_rebase(&self, remote: &str, branch: &str) -> Result<(), GitError> {
    self.run(&["pull", "--quiet", "--rebase", remote, branch]).map(|_| ())
  }

  pub fn head(&self) -> Result<String, GitError> {
    self.run(&["rev-parse", "HEAD"])
  }
}

/// Feedstock clones under one directory, published to a fork remote.
pub struct GitWorkspace {
  root: PathBuf,
  locks: Locks,
  /// Upstream url with `{name}` standing for the feedstock name.
  upstream_template: String,
  /// Remote url branches are pushed to, same placeholder.
  fork_template: String,
  base_branch: String,
  recipe_path: String,
  push: bool,
}

impl GitWorkspace {
  pub fn new(root: impl Into<PathBuf>, locks: Locks, upstream_template: &str, fork_template: &str) -> Self {
    Self {
      root: root.into(),
      locks,
      upstream_template: upstream_template.to_string(),
      fork_template: fork_template.to_string(),
      base_branch: "main".to_string(),
      recipe_path: "recipe/meta.yaml".to_string(),
      push: true,
    }
  }

  pub fn with_base_branch(mut self, branch: &str) -> Self {
    self.base_branch = branch.to_string();
    self
  }

  pub fn with_recipe_path(mut self, path: &str) -> Self {
    self.recipe_path = path.to_string();
    self
  }

  /// With `false`, published branches are committed locally but never pushed.
  pub fn with_push(mut self, push: bool) -> Self {
    self.push = push;
    self
  }

  fn url(template: &str, feedstock: &str) -> String {
    template.replace("{name}", feedstock)
  }
}

impl RecipeWorkspace for GitWorkspace {
  fn checkout(&self, feedstock: &str) -> Result<Checkout, GitError> {
    let _git = self.locks.git();
    let dir = self.root.join(format!("{feedstock}-feedstock"));
    let git = if dir.join(".git").exists() {
      let git = Git::new(&dir);
      git.run(&["fetch", "--quiet", "origin", &self.base_branch])?;
      git.run(&["checkout", "--quiet", "-B", &self.base_branch, &format!("origin/{}", self.base_branch)])?;
      git.run(&["reset", "--quiet", "--hard", &format!("origin/{}", self.base_branch)])?;
      git
    } else {
      Git::clone_into(&Self::url(&self.upstream_template, feedstock), &dir)?
    };

    let path = git.dir().join(&self.recipe_path);
    let recipe_source = std::fs::read_to_string(&path).map_err(|source| GitError::Io { path, source })?;
    Ok(Checkout {
      feedstock: feedstock.to_string(),
      dir,
      recipe_source,
    })
  }

  fn publish(&self, checkout: &Checkout, branch: &str, new_source: &str, message: &str) -> Result<(), GitError> {
    let _git = self.locks.git();
    let git = Git::new(&checkout.dir);
    git.run(&["checkout", "--quiet", "-B", branch])?;

    let path = checkout.dir.join(&self.recipe_path);
    std::fs::write(&path, new_source).map_err(|source| GitError::Io { path, source })?;
    git.add(&[self.recipe_path.as_str()])?;
    git.commit(message)?;

    if !self.push {
      info!(feedstock = %checkout.feedstock, branch, "committed migration branch locally, push disabled");
      return Ok(());
    }
    let fork = Self::url(&self.fork_template, &checkout.feedstock);
    git.run(&["push", "--quiet", "--force", &fork, &format!("HEAD:refs/heads/{branch}")])?;
    info!(feedstock = %checkout.feedstock, branch, "published migration branch");
    Ok(())
  }
}
