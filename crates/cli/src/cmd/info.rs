use anyhow::Result;

use autotick_lib::config::Settings;
use autotick_lib::paths::data_dir;

use crate::output::{OutputFormat, field, print_json};

pub fn cmd_info(settings: &Settings, output: OutputFormat) -> Result<()> {
  if output.is_json() {
    return print_json(settings);
  }

  let backends: Vec<String> = settings.store.backends.iter().map(|b| b.to_string()).collect();
  println!("tick {}", env!("CARGO_PKG_VERSION"));
  field("Data dir", data_dir().display());
  field("Store root", settings.store.root.display());
  field("Backends", backends.join(", "));
  if let Some(url) = &settings.store.http_base_url {
    field("HTTP store", url);
  }
  field("Snapshots", settings.snapshot.dir.display());
  field("Parallelism", settings.schedule.parallelism);
  field("API reserve", settings.schedule.api_reserve);
  field("Bot login", &settings.reconcile.bot_login);
  Ok(())
}
