//! Migration fingerprints.
//!
//! A fingerprint identifies "this change on this node" across runs and restarts. The
//! version migration uses `version:<new version>`. Other variants hash their identity:
//! class, name, migrator version, args and the kwargs that are not operational.

use serde_json::{Map, Value, json};

use super::Migration;
use super::spec::OPERATIONAL_KWARGS;
use crate::graph::NodeAttrs;
use crate::util::hash::short_hash;

/// Which parts of a migration's identity feed its fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FingerprintScheme {
  #[default]
  Full,
  /// Leave out these identity fields or kwargs.
  Without(Vec<String>),
}

impl FingerprintScheme {
  fn excludes(&self, field: &str) -> bool {
    match self {
      FingerprintScheme::Full => false,
      FingerprintScheme::Without(fields) => fields.iter().any(|f| f == field),
    }
  }
}

impl Migration {
  pub fn fingerprint(&self, node: &NodeAttrs) -> String {
    match self {
      Migration::Version(_) => format!("{}:{}", self.class(), node.new_version.as_deref().unwrap_or_default()),
      _ => format!("{}:{}", self.class(), short_hash(&self.identity().to_string())),
    }
  }

  /// The fields hashed into the fingerprint, after applying the scheme.
  pub fn identity(&self) -> Value {
    let spec = self.to_spec();
    let scheme = &self.common().fingerprint;

    let kwargs: Map<String, Value> = spec
      .kwargs
      .into_iter()
      .filter(|(k, _)| !OPERATIONAL_KWARGS.contains(&k.as_str()) && !scheme.excludes(k))
      .collect();

    let mut identity = Map::new();
    for (field, value) in [
      ("class", json!(spec.class)),
      ("name", json!(spec.name)),
      ("args", json!(spec.args)),
      ("kwargs", Value::Object(kwargs)),
    ] {
      if !scheme.excludes(field) {
        identity.insert(field.to_string(), value);
      }
    }
    Value::Object(identity)
  }
}

/// Short, branch-name-safe part of a fingerprint.
pub fn branch_suffix(fingerprint: &str) -> &str {
  let tail = fingerprint.rsplit(':').next().unwrap_or(fingerprint);
  &tail[..tail.len().min(8)]
}
