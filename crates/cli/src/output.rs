//! How `tick` talks to the terminal.
//!
//! Every command either dumps its result as JSON (`-o json`) or prints status lines
//! and `label: value` fields. Warnings go to stderr so JSON on stdout stays parseable.

use std::fmt::Display;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

/// Kind of a one-line status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  Done,
  Note,
  Warn,
  Removed,
}

impl Status {
  pub fn marker(self) -> &'static str {
    match self {
      Status::Done => "✓",
      Status::Note => "•",
      Status::Warn => "⚠",
      Status::Removed => "-",
    }
  }
}

pub fn status(kind: Status, message: impl Display) {
  let marker = kind.marker();
  match kind {
    Status::Warn => eprintln!(
      "{} {}",
      marker.if_supports_color(Stream::Stderr, |s| s.yellow()),
      message.if_supports_color(Stream::Stderr, |s| s.yellow())
    ),
    Status::Done => println!("{} {message}", marker.if_supports_color(Stream::Stdout, |s| s.green())),
    Status::Note => println!("{} {message}", marker.if_supports_color(Stream::Stdout, |s| s.blue())),
    Status::Removed => println!("  {} {message}", marker.if_supports_color(Stream::Stdout, |s| s.red())),
  }
}

/// An indented `label: value` line under a status or heading.
pub fn field(label: &str, value: impl Display) {
  println!("  {}: {value}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()));
}

pub fn heading(text: &str) {
  println!("{}", text.if_supports_color(Stream::Stdout, |s| s.bold()));
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{json}");
  Ok(())
}

/// Binary-prefixed size with one decimal above the byte range.
pub fn size(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
  if bytes < 1024 {
    return format!("{bytes} B");
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit + 1 < UNITS.len() {
    value /= 1024.0;
    unit += 1;
  }
  format!("{value:.1} {}", UNITS[unit])
}
