//! Hashing utilities for change detection, sharding and fingerprints.
//!
//! This module provides:
//! - `ContentHash`: A full 64-character hash used to detect no-op document writes
//! - `hash_bytes()`: Arbitrary byte hashing
//! - `short_hash()`: A truncated hash used in migration fingerprints

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of the truncated hash used in fingerprints.
pub const SHORT_HASH_LEN: usize = 16;

/// A full 64-character SHA256 hash for content verification.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl ContentHash {
  /// The first `len` hex characters of the hash.
  pub fn prefix(&self, len: usize) -> &str {
    &self.0[..len.min(self.0.len())]
  }
}

/// Hash arbitrary bytes.
///
/// Returns the full 64-character SHA256 hash.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}

/// Truncated hash of a string, for identifiers that end up in human-facing places.
pub fn short_hash(data: &str) -> String {
  hash_bytes(data.as_bytes()).prefix(SHORT_HASH_LEN).to_string()
}
