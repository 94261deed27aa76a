//! `tick run`: rehearse migrations end to end.
//!
//! Recipes are checked out and rewritten for real and branches are committed locally,
//! but nothing is pushed and proposals are only simulated. The store is only read:
//! attempt records and saved migrations land in an in-memory overlay that is dropped
//! when the command exits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use autotick_lib::config::Settings;
use autotick_lib::forge::DryRunForge;
use autotick_lib::git::GitWorkspace;
use autotick_lib::graph::BuildOutput;
use autotick_lib::locks::{LockMode, Locks, RunLock};
use autotick_lib::migration::{Migration, load_all};
use autotick_lib::paths::data_dir;
use autotick_lib::runner::SubprocessRunner;
use autotick_lib::schedule::{MigrationReport, NodeOutcome, Scheduler};
use autotick_lib::store::DocumentStore;

use super::graph::load_migration;
use crate::output::{OutputFormat, Status, field, heading, print_json, status};

const DEFAULT_UPSTREAM: &str = "https://github.com/conda-forge/{name}-feedstock.git";

#[derive(Args, Debug)]
pub struct RunArgs {
  /// Migration specs (JSON); without any, every migration in the store runs
  migrations: Vec<PathBuf>,

  /// Program that rewrites recipes
  #[arg(long)]
  runner: PathBuf,

  /// Extra argument for the runner program (repeatable)
  #[arg(long = "runner-arg")]
  runner_args: Vec<String>,

  /// Directory holding feedstock clones
  #[arg(long)]
  workspace: Option<PathBuf>,

  /// Upstream clone url; `{name}` is replaced by the feedstock name
  #[arg(long, default_value = DEFAULT_UPSTREAM)]
  upstream: String,

  /// Fork url branches would be pushed to (default: the upstream url)
  #[arg(long)]
  fork: Option<String>,

  /// Recipe file inside each feedstock
  #[arg(long, default_value = "recipe/meta.yaml")]
  recipe_path: String,

  #[arg(short = 'o', long, value_enum, default_value = "text")]
  output: OutputFormat,
}

pub fn cmd_run(settings: &Settings, args: RunArgs) -> Result<()> {
  let _lock = RunLock::acquire(&settings.store.root, LockMode::Shared, "run")?;
  let store = DocumentStore::from_config(&settings.store).context("Failed to open store")?;
  let build = BuildOutput::load(&store).context("Failed to load graph")?;

  let migrations: Vec<Migration> = if args.migrations.is_empty() {
    load_all(&store).context("Failed to load stored migrations")?
  } else {
    args
      .migrations
      .iter()
      .map(|p| load_migration(p))
      .collect::<Result<_>>()?
  };
  if migrations.is_empty() {
    status(Status::Note, "No migrations to run");
    return Ok(());
  }

  let runner = args
    .runner_args
    .iter()
    .fold(SubprocessRunner::new(&args.runner), |r, a| r.arg(a));
  let locks = Locks::new();
  let workspace_dir = args.workspace.unwrap_or_else(|| data_dir().join("feedstocks"));
  let fork = args.fork.as_deref().unwrap_or(&args.upstream);
  let workspace = GitWorkspace::new(&workspace_dir, locks.clone(), &args.upstream, fork)
    .with_base_branch(&settings.schedule.base_branch)
    .with_recipe_path(&args.recipe_path)
    .with_push(false);
  debug!(workspace = %workspace_dir.display(), "using feedstock workspace");

  let scheduler = Scheduler::new(
    DocumentStore::overlay(&store),
    Arc::new(DryRunForge::new(None)),
    Arc::new(runner),
    Arc::new(workspace),
    locks,
    settings.schedule.clone(),
  )
  .with_retry(settings.forge.retry.clone());

  let start = Instant::now();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let reports = rt
    .block_on(scheduler.run(migrations, &build.graph))
    .context("Migration run failed")?;
  let elapsed = start.elapsed();

  if args.output.is_json() {
    return print_json(&reports);
  }

  for report in &reports {
    print_report(report);
  }
  let elapsed = Duration::from_millis(elapsed.as_millis() as u64);
  status(
    Status::Done,
    format!(
      "Ran {} migration(s) in {}",
      reports.len(),
      humantime::format_duration(elapsed)
    ),
  );
  Ok(())
}

fn print_report(report: &MigrationReport) {
  heading(&report.migration);
  for (node, outcome) in &report.outcomes {
    if let NodeOutcome::Failed { .. } = outcome {
      status(Status::Warn, format!("{node}: {outcome}"));
    } else {
      field(node, outcome);
    }
  }
  field("Proposals opened", report.proposals_opened);
  if let Some(reason) = report.aborted {
    status(Status::Warn, format!("Stopped early: {reason:?}"));
  }
}
