//! Migration descriptors.
//!
//! A [`Migration`] is one of a fixed set of variants. Variant differences are
//! centralized in the methods here (`applies`, `fingerprint`, `effective_graph`);
//! callers never branch on the variant themselves.

pub mod effective;
pub mod fingerprint;
pub mod spec;

use std::collections::BTreeSet;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::graph::NodeAttrs;
use crate::store::StoreError;

pub use effective::effective_graph;
pub use fingerprint::FingerprintScheme;
pub use spec::{MigrationSpec, load_all};

/// Per-run proposal cap when a spec does not name one.
pub const DEFAULT_PR_LIMIT: u32 = 10;

pub const DEFAULT_MAX_OPEN_VERSION_PROPOSALS: u32 = 3;

/// Keys of a pin file that configure the migration rather than name a package.
const PIN_META_KEYS: &[&str] = &["__migrator", "migrator_ts"];

#[derive(Debug, Error)]
pub enum MigrationError {
  #[error("unknown migration class '{0}'")]
  UnknownClass(String),

  #[error("invalid arguments for migration class '{class}': {message}")]
  InvalidArgs { class: String, message: String },

  #[error("invalid migration spec: {0}")]
  InvalidSpec(String),

  #[error("invalid pin file: {0}")]
  PinYaml(#[from] serde_yaml::Error),

  #[error(transparent)]
  Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PiggybackStage {
  Pre,
  Post,
}

/// A sub-step the runner performs before or after the main transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piggyback {
  pub name: String,
  pub stage: PiggybackStage,
  #[serde(default, skip_serializing_if = "Value::is_null")]
  pub args: Value,
}

/// Settings every variant carries.
#[derive(Debug, Clone, PartialEq)]
pub struct Common {
  /// Maximum proposals opened per run.
  pub pr_limit: u32,
  pub migrator_version: u32,
  pub piggybacks: Vec<Piggyback>,
  pub fingerprint: FingerprintScheme,
}

impl Common {
  pub fn with_limit(pr_limit: u32) -> Self {
    Self {
      pr_limit,
      ..Self::default()
    }
  }
}

impl Default for Common {
  fn default() -> Self {
    Self {
      pr_limit: DEFAULT_PR_LIMIT,
      migrator_version: 0,
      piggybacks: Vec::new(),
      fingerprint: FingerprintScheme::Full,
    }
  }
}

/// Bump a feedstock to its newly detected upstream version.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionMigration {
  pub common: Common,
  /// Nodes with this many open version proposals are skipped.
  pub max_open_proposals: u32,
}

/// Rebuild everything that depends on a package whose pin changed.
#[derive(Debug, Clone, PartialEq)]
pub struct RebuildMigration {
  pub common: Common,
  pub name: String,
  /// The pin file, verbatim.
  pub pin_yaml: String,
  pub bump_number: u32,
  packages: BTreeSet<String>,
}

impl RebuildMigration {
  pub fn new(common: Common, name: &str, pin_yaml: &str, bump_number: u32) -> Result<Self, MigrationError> {
    let parsed: serde_yaml::Mapping = serde_yaml::from_str(pin_yaml)?;
    let packages = parsed
      .keys()
      .filter_map(serde_yaml::Value::as_str)
      .filter(|k| !PIN_META_KEYS.contains(k))
      .map(str::to_string)
      .collect();
    Ok(Self {
      common,
      name: name.to_string(),
      pin_yaml: pin_yaml.to_string(),
      bump_number,
      packages,
    })
  }

  /// Package names whose pin changed.
  pub fn packages(&self) -> &BTreeSet<String> {
    &self.packages
  }

  fn mentions(&self, requirement: &str) -> bool {
    self.packages.contains(requirement) || self.packages.contains(&requirement.replace('-', "_"))
  }
}

/// Swap one package for another in every recipe that uses it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplacementMigration {
  pub common: Common,
  pub old_pkg: String,
  pub new_pkg: String,
  pub rationale: String,
}

/// Start building feedstocks for an additional platform.
#[derive(Debug, Clone, PartialEq)]
pub struct AddPlatformMigration {
  pub common: Common,
  pub platform: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Migration {
  Version(VersionMigration),
  Rebuild(RebuildMigration),
  Replacement(ReplacementMigration),
  AddPlatform(AddPlatformMigration),
}

impl Migration {
  /// The version migration with the default cap.
  pub fn version(max_open_proposals: u32) -> Self {
    Migration::Version(VersionMigration {
      common: Common::default(),
      max_open_proposals,
    })
  }

  pub fn class(&self) -> &'static str {
    match self {
      Migration::Version(_) => spec::CLASS_VERSION,
      Migration::Rebuild(_) => spec::CLASS_REBUILD,
      Migration::Replacement(_) => spec::CLASS_REPLACEMENT,
      Migration::AddPlatform(_) => spec::CLASS_ADD_PLATFORM,
    }
  }

  /// Derived name; also the key of the stored spec.
  pub fn name(&self) -> String {
    match self {
      Migration::Version(_) => spec::CLASS_VERSION.to_string(),
      Migration::Rebuild(m) => sanitize(&m.name),
      Migration::Replacement(m) => sanitize(&format!("{}-to-{}", m.old_pkg, m.new_pkg)),
      Migration::AddPlatform(m) => sanitize(&format!("add-{}", m.platform)),
    }
  }

  pub fn common(&self) -> &Common {
    match self {
      Migration::Version(m) => &m.common,
      Migration::Rebuild(m) => &m.common,
      Migration::Replacement(m) => &m.common,
      Migration::AddPlatform(m) => &m.common,
    }
  }

  pub fn pr_limit(&self) -> u32 {
    self.common().pr_limit
  }

  pub fn migrator_version(&self) -> u32 {
    self.common().migrator_version
  }

  pub fn piggybacks(&self) -> &[Piggyback] {
    &self.common().piggybacks
  }

  pub fn is_version(&self) -> bool {
    matches!(self, Migration::Version(_))
  }

  /// Rebuilds wait for their dependencies' proposals to merge first.
  pub fn waits_for_upstream(&self) -> bool {
    matches!(self, Migration::Rebuild(_))
  }

  /// Whether this migration should touch `node` at all.
  pub fn applies(&self, node: &NodeAttrs) -> bool {
    if node.archived || node.parse_error.is_some() {
      return false;
    }
    match self {
      Migration::Version(m) => {
        let Some(new) = node.new_version.as_deref() else {
          return false;
        };
        is_newer(new, node.version.as_deref())
          && node.open_attempts_of(spec::CLASS_VERSION) < m.max_open_proposals as usize
      }
      Migration::Rebuild(m) => node
        .requirements
        .host
        .iter()
        .chain(node.requirements.build.iter())
        .chain(node.requirements.run.iter())
        .any(|r| m.mentions(r)),
      Migration::Replacement(m) => node.requirements.all().contains(m.old_pkg.as_str()),
      Migration::AddPlatform(m) => !node.platforms.iter().any(|p| p == &m.platform),
    }
  }

  /// Parameters handed to the runner for `node`.
  pub fn params(&self, node: &NodeAttrs) -> Value {
    let mut params = json!({
      "migration": self.to_spec(),
      "piggybacks": self.piggybacks(),
    });
    if let Migration::Version(_) = self
      && let Some(new) = &node.new_version
    {
      params["new_version"] = json!(new);
    }
    params
  }

  /// Branch a proposal for `node` is pushed to.
  pub fn branch_name(&self, node: &NodeAttrs) -> String {
    match self {
      Migration::Version(_) => format!("{}-v{}", node.name, node.new_version.as_deref().unwrap_or("unknown")),
      _ => format!("{}-{}", self.name(), fingerprint::branch_suffix(&self.fingerprint(node))),
    }
  }
}

fn sanitize(name: &str) -> String {
  name
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
        c.to_ascii_lowercase()
      } else {
        '_'
      }
    })
    .collect()
}

/// Whether `new` is a later version than `current`.
///
/// Versions that are not semver-like compare as different-means-newer.
pub fn is_newer(new: &str, current: Option<&str>) -> bool {
  let Some(current) = current else {
    return true;
  };
  match (parse_lenient(new), parse_lenient(current)) {
    (Some(a), Some(b)) => a > b,
    _ => new != current,
  }
}

fn parse_lenient(version: &str) -> Option<semver::Version> {
  let version = version.trim().trim_start_matches('v');
  if let Ok(v) = semver::Version::parse(version) {
    return Some(v);
  }
  let mut parts: Vec<&str> = version.split('.').collect();
  let numeric = parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
  if parts.len() > 3 || !numeric {
    return None;
  }
  while parts.len() < 3 {
    parts.push("0");
  }
  semver::Version::parse(&parts.join(".")).ok()
}

/// Order migrations for one run: version first, then ad hoc ones in their given order,
/// then rebuilds shuffled.
pub fn run_order<R: Rng + ?Sized>(migrations: Vec<Migration>, rng: &mut R) -> Vec<Migration> {
  let mut version = Vec::new();
  let mut adhoc = Vec::new();
  let mut rebuild = Vec::new();
  for migration in migrations {
    match migration {
      Migration::Version(_) => version.push(migration),
      Migration::Rebuild(_) => rebuild.push(migration),
      Migration::Replacement(_) | Migration::AddPlatform(_) => adhoc.push(migration),
    }
  }
  rebuild.shuffle(rng);
  version.into_iter().chain(adhoc).chain(rebuild).collect()
}
