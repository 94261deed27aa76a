//! Package name to producing node lookup.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::store::StoredSet;

/// Which nodes claim each output package name.
///
/// Rederived from node attributes on every build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputsLut(BTreeMap<String, StoredSet<String>>);

impl OutputsLut {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, output: &str, node: &str) {
    self.0.entry(output.to_string()).or_default().insert(node.to_string());
  }

  /// The node producing `output`; the first in sorted order when several claim it.
  pub fn producer(&self, output: &str) -> Option<&str> {
    self.0.get(output).and_then(|nodes| nodes.iter().next()).map(String::as_str)
  }

  pub fn producers(&self, output: &str) -> impl Iterator<Item = &str> {
    self.0.get(output).into_iter().flat_map(|nodes| nodes.iter().map(String::as_str))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &StoredSet<String>)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v))
  }
}
