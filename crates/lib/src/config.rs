//! Settings for every component, read from an optional TOML file and then
//! overridden by `TICK_*` environment variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::deploy::DeployConfig;
use crate::forge::RetryPolicy;
use crate::reconcile::ReconcileConfig;
use crate::schedule::ScheduleConfig;
use crate::snapshot::RetentionPolicy;
use crate::store::{BackendKind, StoreConfig};

pub const ENV_STORE_ROOT: &str = "TICK_STORE_ROOT";
pub const ENV_STORE_BACKENDS: &str = "TICK_STORE_BACKENDS";
pub const ENV_STORE_HTTP_URL: &str = "TICK_STORE_HTTP_URL";
pub const ENV_PARALLELISM: &str = "TICK_PARALLELISM";
pub const ENV_API_RESERVE: &str = "TICK_API_RESERVE";
pub const ENV_SNAPSHOT_DIR: &str = "TICK_SNAPSHOT_DIR";
pub const ENV_BOT_LOGIN: &str = "TICK_BOT_LOGIN";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("invalid value '{value}' for {var}: {message}")]
  InvalidEnv {
    var: &'static str,
    value: String,
    message: String,
  },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
  pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
  pub dir: PathBuf,
  pub retention: RetentionPolicy,
}

impl Default for SnapshotConfig {
  fn default() -> Self {
    Self {
      dir: crate::paths::default_snapshots_dir(),
      retention: RetentionPolicy::default(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub store: StoreConfig,
  pub schedule: ScheduleConfig,
  pub reconcile: ReconcileConfig,
  pub forge: ForgeConfig,
  pub deploy: DeployConfig,
  pub snapshot: SnapshotConfig,
}

impl Settings {
  /// Defaults, then `path` if given, then the environment.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let mut settings = match path {
      Some(path) => Self::from_file(path)?,
      None => Self::default(),
    };
    settings.apply_env()?;
    Ok(settings)
  }

  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let settings = toml::from_str(&text).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(path = %path.display(), "loaded config file");
    Ok(settings)
  }

  /// Override fields from `TICK_*` variables that are set.
  pub fn apply_env(&mut self) -> Result<(), ConfigError> {
    if let Some(root) = env_var(ENV_STORE_ROOT) {
      self.store.root = PathBuf::from(root);
    }
    if let Some(list) = env_var(ENV_STORE_BACKENDS) {
      self.store.backends = list
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(BackendKind::from_str)
        .collect::<Result<_, _>>()
        .map_err(|e| ConfigError::InvalidEnv {
          var: ENV_STORE_BACKENDS,
          value: list.clone(),
          message: e.to_string(),
        })?;
    }
    if let Some(url) = env_var(ENV_STORE_HTTP_URL) {
      self.store.http_base_url = Some(url);
    }
    if let Some(n) = parse_env::<usize>(ENV_PARALLELISM)? {
      self.schedule.parallelism = n.max(1);
    }
    if let Some(n) = parse_env::<u64>(ENV_API_RESERVE)? {
      self.schedule.api_reserve = n;
    }
    if let Some(dir) = env_var(ENV_SNAPSHOT_DIR) {
      self.snapshot.dir = PathBuf::from(dir);
    }
    if let Some(login) = env_var(ENV_BOT_LOGIN) {
      self.reconcile.bot_login = login;
    }
    Ok(())
  }
}

/// A set, non-empty variable.
fn env_var(var: &str) -> Option<String> {
  std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  env_var(var)
    .map(|value| {
      value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        var,
        message: e.to_string(),
        value,
      })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::TempDir;

  const ALL_VARS: [&str; 7] = [
    ENV_STORE_ROOT,
    ENV_STORE_BACKENDS,
    ENV_STORE_HTTP_URL,
    ENV_PARALLELISM,
    ENV_API_RESERVE,
    ENV_SNAPSHOT_DIR,
    ENV_BOT_LOGIN,
  ];

  fn clean_env<R>(f: impl FnOnce() -> R) -> R {
    temp_env::with_vars(ALL_VARS.map(|v| (v, None::<&str>)), f)
  }

  #[test]
  #[serial]
  fn defaults_without_file_or_env() {
    let settings = clean_env(|| Settings::load(None).unwrap());
    assert_eq!(settings.store.backends, vec![BackendKind::File]);
    assert_eq!(settings.schedule.api_reserve, 100);
    assert_eq!(settings.reconcile.max_attempts, 3);
    assert_eq!(settings.reconcile.rerun_label, "bot-rerun");
    assert_eq!(settings.deploy.batch_size, 200);
    assert_eq!(settings.forge.retry.max_attempts, 5);
    assert_eq!(settings.snapshot.retention.max_count, 100);
  }

  #[test]
  #[serial]
  fn file_values_are_partial() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("tick.toml");
    std::fs::write(
      &path,
      r#"
[store]
root = "/srv/tick"
backends = ["file", "memory"]

[schedule]
parallelism = 2

[deploy]
batch_size = 50
"#,
    )
    .unwrap();

    let settings = clean_env(|| Settings::load(Some(&path)).unwrap());
    assert_eq!(settings.store.root, PathBuf::from("/srv/tick"));
    assert_eq!(settings.store.backends, vec![BackendKind::File, BackendKind::Memory]);
    assert_eq!(settings.schedule.parallelism, 2);
    assert_eq!(settings.schedule.api_reserve, 100);
    assert_eq!(settings.deploy.batch_size, 50);
    assert_eq!(settings.deploy.max_push_attempts, 5);
  }

  #[test]
  #[serial]
  fn env_overrides_file() {
    let settings = temp_env::with_vars(
      [
        (ENV_STORE_ROOT, Some("/env/store")),
        (ENV_STORE_BACKENDS, Some("http,file")),
        (ENV_STORE_HTTP_URL, Some("https://example.invalid/store")),
        (ENV_PARALLELISM, Some("8")),
        (ENV_API_RESERVE, Some("250")),
        (ENV_SNAPSHOT_DIR, Some("/env/snaps")),
        (ENV_BOT_LOGIN, Some("my-bot")),
      ],
      || Settings::load(None).unwrap(),
    );
    assert_eq!(settings.store.root, PathBuf::from("/env/store"));
    assert_eq!(settings.store.backends, vec![BackendKind::Http, BackendKind::File]);
    assert_eq!(settings.store.http_base_url.as_deref(), Some("https://example.invalid/store"));
    assert_eq!(settings.schedule.parallelism, 8);
    assert_eq!(settings.schedule.api_reserve, 250);
    assert_eq!(settings.snapshot.dir, PathBuf::from("/env/snaps"));
    assert_eq!(settings.reconcile.bot_login, "my-bot");
  }

  #[test]
  #[serial]
  fn bad_env_value_is_reported() {
    let err = temp_env::with_var(ENV_PARALLELISM, Some("lots"), || Settings::load(None).unwrap_err());
    assert!(matches!(err, ConfigError::InvalidEnv { var: ENV_PARALLELISM, .. }));

    let err = temp_env::with_var(ENV_STORE_BACKENDS, Some("file,mongodb"), || {
      Settings::load(None).unwrap_err()
    });
    assert!(matches!(err, ConfigError::InvalidEnv { var: ENV_STORE_BACKENDS, .. }));
  }

  #[test]
  fn malformed_file_is_a_parse_error() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("bad.toml");
    std::fs::write(&path, "[store\nroot = ").unwrap();
    assert!(matches!(Settings::from_file(&path), Err(ConfigError::Parse { .. })));
    assert!(matches!(
      Settings::from_file(&temp.path().join("missing.toml")),
      Err(ConfigError::Read { .. })
    ));
  }
}
