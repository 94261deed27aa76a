//! The backend contract every storage service implements.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors raised by the document store and its backends.
///
/// Backend failures are never retried by the store; callers decide.
#[derive(Debug, Error)]
pub enum StoreError {
  /// I/O failure in a local backend.
  #[error("{backend} backend i/o error on {ns}/{key}: {source}")]
  Io {
    backend: &'static str,
    ns: String,
    key: String,
    #[source]
    source: std::io::Error,
  },

  /// Failure reported by a network backend.
  #[error("{backend} backend request for {ns}/{key} failed: {message}")]
  Backend {
    backend: &'static str,
    ns: String,
    key: String,
    message: String,
  },

  /// A write was attempted on a read-only backend.
  #[error("{backend} backend is read-only")]
  ReadOnly { backend: &'static str },

  /// The backend cannot perform the requested operation.
  #[error("{backend} backend does not support {operation}")]
  Unsupported {
    backend: &'static str,
    operation: &'static str,
  },

  /// A stored document could not be decoded.
  #[error("failed to decode {ns}/{key}: {source}")]
  Decode {
    ns: String,
    key: String,
    #[source]
    source: serde_json::Error,
  },

  /// A value could not be encoded.
  #[error("failed to encode document: {0}")]
  Encode(#[source] serde_json::Error),

  /// Keys and namespaces are path components and must be plain names.
  #[error("invalid store key '{0}'")]
  InvalidKey(String),

  /// A document reference did not parse as `<ns>/<...>/<key>.json`.
  #[error("invalid document reference '{0}'")]
  InvalidReference(String),

  /// Configuration names a backend that does not exist.
  #[error("unknown store backend '{0}'")]
  UnknownBackend(String),

  /// The http backend was selected without a base url.
  #[error("http backend requires a base url")]
  MissingBaseUrl,
}

/// Key/value persistence of serialized documents, partitioned by namespace.
///
/// All backends for one namespace address a document by the same sharded relative
/// path (see [`super::paths::shard_path`]).
pub trait StoreBackend: Send + Sync + fmt::Debug {
  /// Short backend name used in logs and errors.
  fn name(&self) -> &'static str;

  /// Whether `set`/`delete` are supported.
  fn is_writable(&self) -> bool {
    true
  }

  /// Whether the backend keeps its data on the local filesystem.
  fn is_local(&self) -> bool {
    false
  }

  fn exists(&self, ns: &str, key: &str) -> Result<bool, StoreError>;

  /// Serialized contents of a document, or `None` when absent.
  fn get(&self, ns: &str, key: &str) -> Result<Option<String>, StoreError>;

  fn set(&self, ns: &str, key: &str, data: &str) -> Result<(), StoreError>;

  /// Delete documents; missing keys are ignored.
  fn delete(&self, ns: &str, keys: &[&str]) -> Result<(), StoreError>;

  fn list_keys(&self, ns: &str) -> Result<BTreeSet<String>, StoreError>;
}

/// The backend implementations selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  File,
  Memory,
  Http,
}

impl BackendKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      BackendKind::File => "file",
      BackendKind::Memory => "memory",
      BackendKind::Http => "http",
    }
  }
}

impl fmt::Display for BackendKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for BackendKind {
  type Err = StoreError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim() {
      "file" => Ok(BackendKind::File),
      "memory" => Ok(BackendKind::Memory),
      "http" => Ok(BackendKind::Http),
      other => Err(StoreError::UnknownBackend(other.to_string())),
    }
  }
}

/// Reject names that would escape the namespace directory.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
  let bad = name.is_empty()
    || name == "."
    || name == ".."
    || name.contains('/')
    || name.contains('\\')
    || name.contains('\0');
  if bad {
    return Err(StoreError::InvalidKey(name.to_string()));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn backend_kind_parses() {
    assert_eq!("file".parse::<BackendKind>().unwrap(), BackendKind::File);
    assert_eq!(" http ".parse::<BackendKind>().unwrap(), BackendKind::Http);
    assert!(matches!(
      "mongodb".parse::<BackendKind>(),
      Err(StoreError::UnknownBackend(name)) if name == "mongodb"
    ));
  }

  #[test]
  fn validate_name_rejects_path_components() {
    assert!(validate_name("numpy").is_ok());
    assert!(validate_name("python-dateutil").is_ok());
    assert!(validate_name("").is_err());
    assert!(validate_name("..").is_err());
    assert!(validate_name("a/b").is_err());
  }
}
