//! The per-feedstock node document and the variant overlay.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::forge::{ProposalRecord, ProposalState};
use crate::store::StoredSet;

/// Declared requirement names per build phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Requirements {
  pub build: StoredSet<String>,
  pub host: StoredSet<String>,
  pub run: StoredSet<String>,
  pub test: StoredSet<String>,
}

impl Requirements {
  /// Every requirement name across all phases.
  pub fn all(&self) -> BTreeSet<&str> {
    self
      .build
      .iter()
      .chain(self.host.iter())
      .chain(self.run.iter())
      .chain(self.test.iter())
      .map(String::as_str)
      .collect()
  }
}

/// A migration the bot tried on this node.
///
/// Records are append-only; the proposal fields inside are refreshed by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
  pub fingerprint: String,
  pub migrator_name: String,
  pub migrator_version: u32,
  /// `None` when the runner found nothing to change.
  #[serde(default)]
  pub proposal: Option<ProposalRecord>,
  /// Set when a closed proposal may be regenerated.
  #[serde(default)]
  pub rerun: bool,
  #[serde(default)]
  pub created_at: u64,
}

impl AttemptRecord {
  /// The proposal state, with proposal-less records counting as closed.
  pub fn state(&self) -> ProposalState {
    self.proposal.as_ref().map(|p| p.state).unwrap_or(ProposalState::Closed)
  }

  pub fn is_open(&self) -> bool {
    self.state() == ProposalState::Open
  }

  /// Whether this record keeps its fingerprint from being attempted again.
  pub fn blocks_fingerprint(&self) -> bool {
    match self.state() {
      ProposalState::Open | ProposalState::Merged => true,
      ProposalState::Closed => !self.rerun,
    }
  }
}

/// A failure recorded while the bot worked on this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotError {
  pub migration: String,
  pub message: String,
}

/// Attributes of one feedstock (or of a dependency-only package name).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeAttrs {
  pub name: String,
  pub requirements: Requirements,
  pub outputs: StoredSet<String>,
  pub version: Option<String>,
  /// Latest upstream version, filled in by the version checker.
  pub new_version: Option<String>,
  pub archived: bool,
  pub attempts: Vec<AttemptRecord>,
  pub parse_error: Option<String>,
  pub bot_error: Option<BotError>,
  pub strong_exports: bool,
  /// Platforms the feedstock currently builds for.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub platforms: Vec<String>,
  /// Rendered recipe, one entry per build variant, as produced by the recipe parser.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub meta_variants: Vec<Value>,
  /// Fields owned by other tools, carried through unchanged.
  #[serde(flatten)]
  pub extra: BTreeMap<String, Value>,
}

impl NodeAttrs {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      ..Self::default()
    }
  }

  /// Whether a record with `fingerprint` blocks a new attempt.
  pub fn has_blocking_attempt(&self, fingerprint: &str) -> bool {
    self
      .attempts
      .iter()
      .any(|a| a.fingerprint == fingerprint && a.blocks_fingerprint())
  }

  pub fn attempts_for<'a>(&'a self, fingerprint: &'a str) -> impl Iterator<Item = &'a AttemptRecord> + 'a {
    self.attempts.iter().filter(move |a| a.fingerprint == fingerprint)
  }

  /// Open proposals created by migrations named `migrator_name`.
  pub fn open_attempts_of(&self, migrator_name: &str) -> usize {
    self
      .attempts
      .iter()
      .filter(|a| a.migrator_name == migrator_name && a.is_open())
      .count()
  }

  /// Replace requirements, outputs and export flags with those of a flattened recipe.
  pub fn apply_recipe(&mut self, recipe: &Value) {
    let mut requirements = Requirements::default();
    let mut outputs = StoredSet::new();
    let mut strong_exports = false;

    if let Some(name) = recipe.pointer("/package/name").and_then(Value::as_str) {
      outputs.insert(name.to_string());
    }
    if let Some(version) = recipe.pointer("/package/version") {
      self.version = scalar_string(version);
    }

    collect_requirements(recipe, &mut requirements);
    strong_exports |= has_strong_exports(recipe.get("build"));

    for output in recipe.get("outputs").and_then(Value::as_array).into_iter().flatten() {
      if let Some(name) = output.get("name").and_then(Value::as_str) {
        outputs.insert(name.to_string());
      }
      collect_requirements(output, &mut requirements);
      strong_exports |= has_strong_exports(output.get("build"));
    }

    // Older recipes put everything under build.
    if requirements.host.is_empty() {
      requirements.host = requirements.build.clone();
    }

    if outputs.is_empty() {
      outputs.insert(self.name.clone());
    }

    self.requirements = requirements;
    self.outputs = outputs;
    self.strong_exports = strong_exports;
  }
}

fn scalar_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

fn collect_requirements(section: &Value, into: &mut Requirements) {
  let reqs = section.get("requirements");
  extend_names(&mut into.build, reqs.and_then(|r| r.get("build")));
  extend_names(&mut into.host, reqs.and_then(|r| r.get("host")));
  extend_names(&mut into.run, reqs.and_then(|r| r.get("run")));
  extend_names(&mut into.test, section.pointer("/test/requires"));
}

fn extend_names(set: &mut StoredSet<String>, list: Option<&Value>) {
  for spec in list.and_then(Value::as_array).into_iter().flatten() {
    if let Some(name) = spec.as_str().and_then(package_name) {
      set.insert(name);
    }
  }
}

/// The package name of a requirement spec such as `numpy >=1.20` or `python_abi 3.12.* *_cp312`.
pub fn package_name(spec: &str) -> Option<String> {
  let name: String = spec
    .trim()
    .chars()
    .take_while(|c| !c.is_whitespace() && !matches!(c, '<' | '>' | '=' | '!' | '~' | '[' | ';'))
    .collect();
  (!name.is_empty()).then(|| name.to_lowercase())
}

fn has_strong_exports(build: Option<&Value>) -> bool {
  build
    .and_then(|b| b.get("run_exports"))
    .and_then(|e| e.get("strong"))
    .and_then(Value::as_array)
    .is_some_and(|s| !s.is_empty())
}

/// Overlay per-variant recipes into one structure.
///
/// Earlier variants win for scalars; objects merge key by key; lists are concatenated.
/// Repeated list entries are then dropped, keeping the first occurrence.
pub fn overlay_variants(variants: &[Value]) -> Value {
  let mut merged = Value::Null;
  for variant in variants {
    merged = overlay(merged, variant);
  }
  if merged.is_null() {
    return Value::Object(Map::new());
  }
  dedupe_lists(&mut merged);
  merged
}

fn overlay(base: Value, next: &Value) -> Value {
  match (base, next) {
    (Value::Null, next) => next.clone(),
    (Value::Object(mut base), Value::Object(next)) => {
      for (key, value) in next {
        let merged = match base.remove(key) {
          Some(existing) => overlay(existing, value),
          None => value.clone(),
        };
        base.insert(key.clone(), merged);
      }
      Value::Object(base)
    }
    (Value::Array(mut base), Value::Array(next)) => {
      base.extend(next.iter().cloned());
      Value::Array(base)
    }
    (base, _) => base,
  }
}

fn dedupe_lists(value: &mut Value) {
  match value {
    Value::Array(items) => {
      let mut seen: Vec<Value> = Vec::with_capacity(items.len());
      for item in items.drain(..) {
        if !seen.contains(&item) {
          seen.push(item);
        }
      }
      for item in &mut seen {
        dedupe_lists(item);
      }
      *items = seen;
    }
    Value::Object(map) => {
      for item in map.values_mut() {
        dedupe_lists(item);
      }
    }
    _ => {}
  }
}
