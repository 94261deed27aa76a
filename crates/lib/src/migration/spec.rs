//! Serialized migration descriptors.
//!
//! Every migration serializes to `{class, args, kwargs, name}`. [`Migration::from_spec`]
//! is the only place a class name turns back into a variant.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{
  AddPlatformMigration, Common, FingerprintScheme, Migration, MigrationError, Piggyback, RebuildMigration,
  ReplacementMigration, VersionMigration,
};
use crate::consts::MIGRATIONS_NS;
use crate::store::{DocumentStore, codec};

pub const CLASS_VERSION: &str = "version";
pub const CLASS_REBUILD: &str = "rebuild";
pub const CLASS_REPLACEMENT: &str = "replacement";
pub const CLASS_ADD_PLATFORM: &str = "add_platform";

/// Kwargs that tune a run without changing what a migration does.
pub(crate) const OPERATIONAL_KWARGS: &[&str] = &["pr_limit", "fingerprint_exclude", "max_open_proposals"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSpec {
  pub class: String,
  #[serde(default)]
  pub args: Vec<Value>,
  #[serde(default)]
  pub kwargs: BTreeMap<String, Value>,
  pub name: String,
}

impl MigrationSpec {
  /// Canonical text form; equal specs always produce identical bytes.
  pub fn to_canonical(&self) -> Result<String, MigrationError> {
    Ok(codec::dumps(self)?)
  }

  pub fn from_json(text: &str) -> Result<Self, MigrationError> {
    serde_json::from_str(text).map_err(|e| MigrationError::InvalidSpec(e.to_string()))
  }
}

impl Migration {
  pub fn to_spec(&self) -> MigrationSpec {
    let common = self.common();
    let mut kwargs = BTreeMap::new();
    kwargs.insert("pr_limit".to_string(), json!(common.pr_limit));
    kwargs.insert("migrator_version".to_string(), json!(common.migrator_version));
    if !common.piggybacks.is_empty() {
      kwargs.insert("piggybacks".to_string(), json!(common.piggybacks));
    }
    if let FingerprintScheme::Without(fields) = &common.fingerprint {
      kwargs.insert("fingerprint_exclude".to_string(), json!(fields));
    }

    let args = match self {
      Migration::Version(m) => {
        kwargs.insert("max_open_proposals".to_string(), json!(m.max_open_proposals));
        Vec::new()
      }
      Migration::Rebuild(m) => {
        kwargs.insert("bump_number".to_string(), json!(m.bump_number));
        vec![json!(m.name), json!(m.pin_yaml)]
      }
      Migration::Replacement(m) => vec![json!(m.old_pkg), json!(m.new_pkg), json!(m.rationale)],
      Migration::AddPlatform(m) => vec![json!(m.platform)],
    };

    MigrationSpec {
      class: self.class().to_string(),
      args,
      kwargs,
      name: self.name(),
    }
  }

  /// Rebuild a migration from its serialized form.
  pub fn from_spec(spec: &MigrationSpec) -> Result<Self, MigrationError> {
    let class = spec.class.as_str();
    let common = Common {
      pr_limit: kwarg(spec, "pr_limit")?.unwrap_or(super::DEFAULT_PR_LIMIT),
      migrator_version: kwarg(spec, "migrator_version")?.unwrap_or(0),
      piggybacks: kwarg::<Vec<Piggyback>>(spec, "piggybacks")?.unwrap_or_default(),
      fingerprint: match kwarg::<Vec<String>>(spec, "fingerprint_exclude")? {
        Some(fields) => FingerprintScheme::Without(fields),
        None => FingerprintScheme::Full,
      },
    };

    let migration = match class {
      CLASS_VERSION => Migration::Version(VersionMigration {
        common,
        max_open_proposals: kwarg(spec, "max_open_proposals")?.unwrap_or(super::DEFAULT_MAX_OPEN_VERSION_PROPOSALS),
      }),
      CLASS_REBUILD => {
        let name: String = arg(spec, 0)?;
        let pin_yaml: String = arg(spec, 1)?;
        let bump_number = kwarg(spec, "bump_number")?.unwrap_or(1);
        Migration::Rebuild(RebuildMigration::new(common, &name, &pin_yaml, bump_number)?)
      }
      CLASS_REPLACEMENT => Migration::Replacement(ReplacementMigration {
        common,
        old_pkg: arg(spec, 0)?,
        new_pkg: arg(spec, 1)?,
        rationale: arg(spec, 2)?,
      }),
      CLASS_ADD_PLATFORM => Migration::AddPlatform(AddPlatformMigration {
        common,
        platform: arg(spec, 0)?,
      }),
      other => return Err(MigrationError::UnknownClass(other.to_string())),
    };
    Ok(migration)
  }

  /// Persist this migration's spec under its name.
  pub fn save(&self, store: &DocumentStore) -> Result<bool, MigrationError> {
    let mut doc = store.document(MIGRATIONS_NS, &self.name());
    let mut guard = doc.edit()?;
    guard.set_typed(&self.to_spec())?;
    Ok(guard.finish()?)
  }
}

/// Load every persisted migration, sorted by name.
pub fn load_all(store: &DocumentStore) -> Result<Vec<Migration>, MigrationError> {
  let mut out = Vec::new();
  for key in store.list_keys(MIGRATIONS_NS)? {
    let spec: MigrationSpec = store.document(MIGRATIONS_NS, &key).read()?;
    out.push(Migration::from_spec(&spec)?);
  }
  Ok(out)
}

fn arg<T: serde::de::DeserializeOwned>(spec: &MigrationSpec, index: usize) -> Result<T, MigrationError> {
  let value = spec.args.get(index).cloned().ok_or_else(|| MigrationError::InvalidArgs {
    class: spec.class.clone(),
    message: format!("missing positional argument {index}"),
  })?;
  serde_json::from_value(value).map_err(|e| MigrationError::InvalidArgs {
    class: spec.class.clone(),
    message: format!("argument {index}: {e}"),
  })
}

fn kwarg<T: serde::de::DeserializeOwned>(spec: &MigrationSpec, key: &str) -> Result<Option<T>, MigrationError> {
  spec
    .kwargs
    .get(key)
    .map(|value| {
      serde_json::from_value(value.clone()).map_err(|e| MigrationError::InvalidArgs {
        class: spec.class.clone(),
        message: format!("{key}: {e}"),
      })
    })
    .transpose()
}
