//! `tick store`: read-only access to documents.

use anyhow::{Context, Result, bail};
use clap::Subcommand;

use autotick_lib::config::Settings;
use autotick_lib::store::DocumentStore;

use crate::output::{OutputFormat, Status, print_json, status};

#[derive(Subcommand, Debug)]
pub enum StoreCommand {
  /// Print one document
  Get {
    /// Namespace, e.g. node_attrs
    ns: String,
    key: String,
  },

  /// List the keys of a namespace
  List {
    ns: String,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

pub fn cmd_store(settings: &Settings, command: StoreCommand) -> Result<()> {
  let store = DocumentStore::from_config(&settings.store).context("Failed to open store")?;
  match command {
    StoreCommand::Get { ns, key } => {
      let Some(value) = store.get(&ns, &key).with_context(|| format!("Failed to read {ns}/{key}"))? else {
        bail!("No document {ns}/{key}");
      };
      print_json(&value)
    }
    StoreCommand::List { ns, output } => {
      let keys = store.list_keys(&ns).with_context(|| format!("Failed to list {ns}"))?;
      if output.is_json() {
        return print_json(&keys);
      }
      if keys.is_empty() {
        status(Status::Note, format!("No documents in {ns}"));
      }
      for key in keys {
        println!("{key}");
      }
      Ok(())
    }
  }
}
