use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use tracing::info;

use autotick_lib::config::Settings;
use autotick_lib::consts::NODE_ATTRS_NS;
use autotick_lib::graph::{BuildOutput, GraphBuilder, build_order};
use autotick_lib::locks::{LockMode, RunLock};
use autotick_lib::migration::{Migration, MigrationSpec};
use autotick_lib::store::DocumentStore;

use crate::output::{OutputFormat, Status, field, print_json, status};

#[derive(Subcommand, Debug)]
pub enum GraphCommand {
  /// Refresh node documents and rederive the graph
  Build {
    /// Feedstocks to refresh (default: every node document)
    names: Vec<String>,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Summarize the stored graph
  Show {
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

#[derive(Serialize)]
struct GraphSummary {
  nodes: usize,
  edges: usize,
  feedstocks: usize,
  outputs: usize,
  strong_exports: usize,
  parse_failures: Vec<String>,
  changed: bool,
}

impl GraphSummary {
  fn of(build: &BuildOutput, changed: bool) -> Self {
    Self {
      nodes: build.graph.node_count(),
      edges: build.graph.edge_count(),
      feedstocks: build.graph.feedstocks().count(),
      outputs: build.outputs.len(),
      strong_exports: build.strong_exports.len(),
      parse_failures: build.parse_failures.clone(),
      changed,
    }
  }

  fn print(&self) {
    field("Nodes", self.nodes);
    field("Edges", self.edges);
    field("Feedstocks", self.feedstocks);
    field("Outputs", self.outputs);
    field("Strong exports", self.strong_exports);
  }
}

pub fn cmd_graph(settings: &Settings, command: GraphCommand) -> Result<()> {
  match command {
    GraphCommand::Build { names, output } => build(settings, names, output),
    GraphCommand::Show { output } => {
      let store = DocumentStore::from_config(&settings.store).context("Failed to open store")?;
      let build = BuildOutput::load(&store).context("Failed to load graph")?;
      let summary = GraphSummary::of(&build, false);
      if output.is_json() {
        return print_json(&summary);
      }
      summary.print();
      Ok(())
    }
  }
}

fn build(settings: &Settings, names: Vec<String>, output: OutputFormat) -> Result<()> {
  let _lock = RunLock::acquire(&settings.store.root, LockMode::Exclusive, "graph build")?;
  let store = DocumentStore::from_config(&settings.store).context("Failed to open store")?;

  let names: Vec<String> = if names.is_empty() {
    store
      .list_keys(NODE_ATTRS_NS)
      .context("Failed to list node documents")?
      .into_iter()
      .collect()
  } else {
    names
  };
  let previous = BuildOutput::load(&store).context("Failed to load previous graph")?;

  let build = GraphBuilder::new(&store)
    .build(&names, Some(&previous.graph))
    .context("Failed to build graph")?;
  let changed = build.save(&store).context("Failed to save graph")?;
  info!(nodes = build.graph.node_count(), changed, "graph built");

  let summary = GraphSummary::of(&build, changed);
  if output.is_json() {
    return print_json(&summary);
  }

  if changed {
    status(Status::Done, "Graph updated");
  } else {
    status(Status::Note, "Graph unchanged");
  }
  summary.print();
  for node in &summary.parse_failures {
    status(Status::Warn, format!("Recipe of '{node}' failed to parse"));
  }
  Ok(())
}

pub fn cmd_order(settings: &Settings, migration: Option<&Path>, output: OutputFormat) -> Result<()> {
  let store = DocumentStore::from_config(&settings.store).context("Failed to open store")?;
  let build = BuildOutput::load(&store).context("Failed to load graph")?;

  let order: Vec<String> = match migration {
    Some(path) => {
      let migration = load_migration(path)?;
      let effective = migration
        .effective(&build.graph, &store)
        .with_context(|| format!("Failed to compute effective graph of {}", migration.name()))?;
      build_order(&effective.graph)
        .into_iter()
        .filter(|n| effective.applicable.contains(n))
        .collect()
    }
    None => build_order(&build.graph)
      .into_iter()
      .filter(|n| build.graph.is_feedstock(n))
      .collect(),
  };

  if output.is_json() {
    return print_json(&order);
  }
  if order.is_empty() {
    status(Status::Note, "Nothing to order");
  }
  for name in order {
    println!("{name}");
  }
  Ok(())
}

pub(super) fn load_migration(path: &Path) -> Result<Migration> {
  let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
  let spec = MigrationSpec::from_json(&text).with_context(|| format!("Invalid migration spec {}", path.display()))?;
  Migration::from_spec(&spec).with_context(|| format!("Invalid migration spec {}", path.display()))
}
