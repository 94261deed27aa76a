//! Read-only backend serving documents over plain HTTP.
//!
//! Documents are fetched from `<base_url>/<ns>/<shard path>`, which matches the
//! layout of a published file store (for example a raw-content view of the store's
//! git repository).

use std::collections::BTreeSet;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use tracing::debug;

use super::backend::{StoreBackend, StoreError, validate_name};
use super::paths::doc_address;

const BACKEND: &str = "http";

#[derive(Debug, Clone)]
pub struct HttpBackend {
  base_url: String,
  client: Client,
}

impl HttpBackend {
  pub fn new(base_url: impl Into<String>) -> Result<Self, StoreError> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| StoreError::Backend {
        backend: BACKEND,
        ns: String::new(),
        key: String::new(),
        message: e.to_string(),
      })?;

    Ok(Self {
      base_url: base_url.into().trim_end_matches('/').to_string(),
      client,
    })
  }

  fn url(&self, ns: &str, key: &str) -> String {
    format!("{}/{}", self.base_url, doc_address(ns, key))
  }

  fn request_err(ns: &str, key: &str, message: impl ToString) -> StoreError {
    StoreError::Backend {
      backend: BACKEND,
      ns: ns.to_string(),
      key: key.to_string(),
      message: message.to_string(),
    }
  }
}

impl StoreBackend for HttpBackend {
  fn name(&self) -> &'static str {
    BACKEND
  }

  fn is_writable(&self) -> bool {
    false
  }

  fn exists(&self, ns: &str, key: &str) -> Result<bool, StoreError> {
    validate_name(ns)?;
    validate_name(key)?;
    let response = self
      .client
      .head(self.url(ns, key))
      .send()
      .map_err(|e| Self::request_err(ns, key, e))?;
    match response.status() {
      StatusCode::NOT_FOUND => Ok(false),
      status if status.is_success() => Ok(true),
      status => Err(Self::request_err(ns, key, format!("HTTP {}", status))),
    }
  }

  fn get(&self, ns: &str, key: &str) -> Result<Option<String>, StoreError> {
    validate_name(ns)?;
    validate_name(key)?;
    let url = self.url(ns, key);
    debug!(url = %url, "fetching document");

    let response = self.client.get(&url).send().map_err(|e| Self::request_err(ns, key, e))?;
    match response.status() {
      StatusCode::NOT_FOUND => Ok(None),
      status if status.is_success() => response.text().map(Some).map_err(|e| Self::request_err(ns, key, e)),
      status => Err(Self::request_err(ns, key, format!("HTTP {}", status))),
    }
  }

  fn set(&self, _ns: &str, _key: &str, _data: &str) -> Result<(), StoreError> {
    Err(StoreError::ReadOnly { backend: BACKEND })
  }

  fn delete(&self, _ns: &str, _keys: &[&str]) -> Result<(), StoreError> {
    Err(StoreError::ReadOnly { backend: BACKEND })
  }

  fn list_keys(&self, _ns: &str) -> Result<BTreeSet<String>, StoreError> {
    Err(StoreError::Unsupported {
      backend: BACKEND,
      operation: "list_keys",
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn urls_use_sharded_layout() {
    let backend = HttpBackend::new("https://example.org/store/").unwrap();
    assert_eq!(
      backend.url("node_attrs", "numpy"),
      format!("https://example.org/store/{}", doc_address("node_attrs", "numpy"))
    );
  }

  #[test]
  fn writes_are_rejected() {
    let backend = HttpBackend::new("https://example.org").unwrap();
    assert!(!backend.is_writable());
    assert!(matches!(backend.set("a", "b", "{}"), Err(StoreError::ReadOnly { .. })));
    assert!(matches!(backend.delete("a", &["b"]), Err(StoreError::ReadOnly { .. })));
    assert!(matches!(backend.list_keys("a"), Err(StoreError::Unsupported { .. })));
  }
}
