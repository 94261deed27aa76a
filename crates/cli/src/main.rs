mod cmd;
mod output;
mod prompts;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use autotick_lib::config::Settings;

use cmd::{GraphCommand, RunArgs, SnapshotCommand, StoreCommand};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "tick")]
#[command(author, version, about = "Feedstock migration bot state and scheduling", long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Settings file (TOML); TICK_* variables override it
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Inspect documents in the store
  Store {
    #[command(subcommand)]
    command: StoreCommand,
  },

  /// Build and inspect the dependency graph
  Graph {
    #[command(subcommand)]
    command: GraphCommand,
  },

  /// Print the build order of the graph, or of a migration's effective graph
  Order {
    /// Migration spec (JSON); without it the whole graph is ordered
    migration: Option<PathBuf>,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Rehearse migrations against the stored graph without contacting the platform
  Run(RunArgs),

  /// Commit and push changed store documents
  Deploy {
    /// Commit message
    #[arg(short, long, default_value = "Update bot state")]
    message: String,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Manage store snapshots
  Snapshot {
    #[command(subcommand)]
    command: SnapshotCommand,
  },

  /// Show effective settings
  Info {
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

  match cli.command {
    Commands::Store { command } => cmd::cmd_store(&settings, command),
    Commands::Graph { command } => cmd::cmd_graph(&settings, command),
    Commands::Order { migration, output } => cmd::cmd_order(&settings, migration.as_deref(), output),
    Commands::Run(args) => cmd::cmd_run(&settings, args),
    Commands::Deploy { message, output } => cmd::cmd_deploy(&settings, &message, output),
    Commands::Snapshot { command } => cmd::cmd_snapshot(&settings, command),
    Commands::Info { output } => cmd::cmd_info(&settings, output),
  }
}
