use anyhow::{Context, Result};

use autotick_lib::config::Settings;
use autotick_lib::deploy::deploy;
use autotick_lib::git::Git;
use autotick_lib::locks::{LockMode, RunLock};

use crate::output::{OutputFormat, Status, field, print_json, status};

pub fn cmd_deploy(settings: &Settings, message: &str, output: OutputFormat) -> Result<()> {
  let root = &settings.store.root;
  let _lock = RunLock::acquire(root, LockMode::Exclusive, "deploy")?;

  let repo = Git::new(root);
  let report = deploy(&repo, &settings.deploy, message)
    .with_context(|| format!("Failed to deploy {}", root.display()))?;

  if output.is_json() {
    return print_json(&report);
  }
  if report.files == 0 {
    status(Status::Note, "Nothing to deploy");
    return Ok(());
  }
  status(
    Status::Done,
    format!(
      "Deployed {} file(s) to {}/{}",
      report.files, settings.deploy.remote, settings.deploy.branch
    ),
  );
  field("Commits", report.commits);
  field("Push attempts", report.push_attempts);
  Ok(())
}
