//! Sharded key layout shared by every backend.
//!
//! A key `numpy` in namespace `node_attrs` lives at
//! `node_attrs/<h0>/<h1>/<h2>/<h3>/<h4>/numpy.json` where `h0..h4` are the first
//! [`SHARD_WIDTH`] hex characters of `sha256("numpy")`. Every backend for a namespace
//! addresses documents with this same relative path.

use std::path::{Path, PathBuf};

use crate::consts::{DOC_EXTENSION, SHARD_WIDTH};
use crate::util::hash::hash_bytes;

/// Relative path of `key` within its namespace, as a `/`-separated string.
pub fn shard_path(key: &str) -> String {
  let hash = hash_bytes(key.as_bytes());
  let mut parts: Vec<String> = hash.prefix(SHARD_WIDTH).chars().map(|c| c.to_string()).collect();
  parts.push(format!("{}.{}", key, DOC_EXTENSION));
  parts.join("/")
}

/// Full relative address of a document: `<ns>/<shard path>`.
pub fn doc_address(ns: &str, key: &str) -> String {
  format!("{}/{}", ns, shard_path(key))
}

/// Filesystem location of a document under a store root.
pub fn doc_file(root: &Path, ns: &str, key: &str) -> PathBuf {
  let mut path = root.join(ns);
  for part in shard_path(key).split('/') {
    path.push(part);
  }
  path
}

/// Split a document address back into `(ns, key)`.
///
/// Accepts both sharded addresses and the flat `<ns>/<key>.json` form.
pub fn parse_address(address: &str) -> Option<(String, String)> {
  let (ns, rest) = address.split_once('/')?;
  let file = rest.rsplit('/').next()?;
  let key = file.strip_suffix(&format!(".{}", DOC_EXTENSION))?;
  if ns.is_empty() || key.is_empty() {
    return None;
  }
  Some((ns.to_string(), key.to_string()))
}

/// Recover a key from a sharded file name; `None` for non-document files.
pub fn key_from_file_name(file_name: &str) -> Option<&str> {
  file_name
    .strip_suffix(DOC_EXTENSION)
    .and_then(|s| s.strip_suffix('.'))
    .filter(|k| !k.is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[test]
  fn shard_path_is_deterministic() {
    assert_eq!(shard_path("numpy"), shard_path("numpy"));
  }

  #[test]
  fn shard_path_has_expected_depth() {
    let path = shard_path("numpy");
    let parts: Vec<&str> = path.split('/').collect();
    assert_eq!(parts.len(), SHARD_WIDTH + 1);
    assert_eq!(parts.last(), Some(&"numpy.json"));
    assert!(parts[..SHARD_WIDTH].iter().all(|p| p.len() == 1));
  }

  #[test]
  fn distinct_keys_never_share_a_path() {
    let paths: HashSet<String> = (0..50_000).map(|i| shard_path(&format!("pkg-{}", i))).collect();
    assert_eq!(paths.len(), 50_000);
  }

  #[test]
  fn doc_file_matches_address() {
    let root = Path::new("/store");
    let file = doc_file(root, "node_attrs", "scipy");
    let expected = root.join(doc_address("node_attrs", "scipy"));
    assert_eq!(file, expected);
  }

  #[test]
  fn parse_address_round_trips() {
    let address = doc_address("node_attrs", "numpy");
    assert_eq!(
      parse_address(&address),
      Some(("node_attrs".to_string(), "numpy".to_string()))
    );
    assert_eq!(
      parse_address("node_attrs/numpy.json"),
      Some(("node_attrs".to_string(), "numpy".to_string()))
    );
    assert_eq!(parse_address("numpy.json"), None);
    assert_eq!(parse_address("node_attrs/numpy.yaml"), None);
  }

  #[test]
  fn key_from_file_name_strips_extension() {
    assert_eq!(key_from_file_name("numpy.json"), Some("numpy"));
    assert_eq!(key_from_file_name("numpy.json.tmp"), None);
    assert_eq!(key_from_file_name(".json"), None);
  }
}
