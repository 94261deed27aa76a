//! Canonical document encoding.
//!
//! Documents are JSON with two extensions:
//!
//! - a reference to another document, `{"__lazy_json__": "<ns>/<key>.json"}`, which is
//!   kept as a reference on decode and resolved only when the caller asks for it;
//! - an unordered collection, `{"__set__": true, "elements": [...]}`, whose elements are
//!   always written sorted and deduplicated.
//!
//! Object keys are written sorted, so logically-equal values serialize byte-identically.

use std::collections::BTreeSet;
use std::fmt;

use serde::de::{self, DeserializeOwned, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::backend::StoreError;
use super::paths::parse_address;
use crate::consts::{DOC_EXTENSION, DOC_REF_MARKER, SET_ELEMENTS, SET_MARKER};

/// A reference to another document, resolved lazily.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocRef {
  #[serde(rename = "__lazy_json__")]
  pub address: String,
}

impl DocRef {
  pub fn new(ns: &str, key: &str) -> Self {
    Self {
      address: format!("{}/{}.{}", ns, key, DOC_EXTENSION),
    }
  }

  /// The `(namespace, key)` pair this reference points at.
  pub fn target(&self) -> Result<(String, String), StoreError> {
    parse_address(&self.address).ok_or_else(|| StoreError::InvalidReference(self.address.clone()))
  }

  /// Recognize a reference embedded in an untyped value.
  pub fn from_value(value: &Value) -> Option<Self> {
    let obj = value.as_object()?;
    if obj.len() != 1 {
      return None;
    }
    obj.get(DOC_REF_MARKER)?.as_str().map(|address| Self {
      address: address.to_string(),
    })
  }
}

/// An unordered collection with a deterministic encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoredSet<T: Ord>(pub BTreeSet<T>);

impl<T: Ord> Default for StoredSet<T> {
  fn default() -> Self {
    Self(BTreeSet::new())
  }
}

impl<T: Ord> StoredSet<T> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, value: T) -> bool {
    self.0.insert(value)
  }

  pub fn contains(&self, value: &T) -> bool {
    self.0.contains(value)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &T> {
    self.0.iter()
  }
}

impl<T: Ord> FromIterator<T> for StoredSet<T> {
  fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

impl<'a, T: Ord> IntoIterator for &'a StoredSet<T> {
  type Item = &'a T;
  type IntoIter = std::collections::btree_set::Iter<'a, T>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.iter()
  }
}

impl<T: Ord + Serialize> Serialize for StoredSet<T> {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(2))?;
    map.serialize_entry(SET_MARKER, &true)?;
    map.serialize_entry(SET_ELEMENTS, &self.0)?;
    map.end()
  }
}

impl<'de, T: Ord + Deserialize<'de>> Deserialize<'de> for StoredSet<T> {
  /// Accepts the tagged form as well as a bare list.
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct SetVisitor<T>(std::marker::PhantomData<T>);

    impl<'de, T: Ord + Deserialize<'de>> Visitor<'de> for SetVisitor<T> {
      type Value = StoredSet<T>;

      fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a tagged set or a list")
      }

      fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut set = BTreeSet::new();
        while let Some(item) = seq.next_element()? {
          set.insert(item);
        }
        Ok(StoredSet(set))
      }

      fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut elements: Option<Vec<T>> = None;
        let mut tagged = false;
        while let Some(key) = map.next_key::<String>()? {
          match key.as_str() {
            SET_MARKER => tagged = map.next_value()?,
            SET_ELEMENTS => elements = Some(map.next_value()?),
            _ => {
              map.next_value::<de::IgnoredAny>()?;
            }
          }
        }
        if !tagged {
          return Err(de::Error::missing_field(SET_MARKER));
        }
        Ok(StoredSet(elements.unwrap_or_default().into_iter().collect()))
      }
    }

    deserializer.deserialize_any(SetVisitor(std::marker::PhantomData))
  }
}

/// Sort and deduplicate the elements of every tagged set inside `value`.
pub fn canonicalize(value: &mut Value) {
  match value {
    Value::Array(items) => items.iter_mut().for_each(canonicalize),
    Value::Object(map) => {
      map.values_mut().for_each(canonicalize);
      let is_set = map.get(SET_MARKER).and_then(Value::as_bool) == Some(true);
      if is_set && let Some(Value::Array(elements)) = map.get_mut(SET_ELEMENTS) {
        let mut keyed: Vec<(String, Value)> = elements
          .drain(..)
          .map(|v| (serde_json::to_string(&v).unwrap_or_default(), v))
          .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.dedup_by(|a, b| a.0 == b.0);
        elements.extend(keyed.into_iter().map(|(_, v)| v));
      }
    }
    _ => {}
  }
}

/// Serialize a value in canonical form.
pub fn dumps<T: Serialize + ?Sized>(value: &T) -> Result<String, StoreError> {
  let mut value = serde_json::to_value(value).map_err(StoreError::Encode)?;
  canonicalize(&mut value);

  let mut buf = Vec::new();
  let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
  let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
  value.serialize(&mut ser).map_err(StoreError::Encode)?;
  String::from_utf8(buf).map_err(|e| StoreError::Encode(serde::ser::Error::custom(e)))
}

/// Parse stored text; document references stay unresolved.
pub fn loads(ns: &str, key: &str, text: &str) -> Result<Value, StoreError> {
  serde_json::from_str(text).map_err(|source| StoreError::Decode {
    ns: ns.to_string(),
    key: key.to_string(),
    source,
  })
}

/// Decode a value into a typed document.
pub fn from_value<T: DeserializeOwned>(ns: &str, key: &str, value: Value) -> Result<T, StoreError> {
  serde_json::from_value(value).map_err(|source| StoreError::Decode {
    ns: ns.to_string(),
    key: key.to_string(),
    source,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn object_keys_are_sorted() {
    let a = dumps(&json!({"b": 1, "a": 2})).unwrap();
    let b = dumps(&json!({"a": 2, "b": 1})).unwrap();
    assert_eq!(a, b);
    assert!(a.find("\"a\"").unwrap() < a.find("\"b\"").unwrap());
  }

  #[test]
  fn stored_set_serializes_sorted_and_tagged() {
    let set: StoredSet<String> = ["zlib", "numpy", "abseil"].iter().map(|s| s.to_string()).collect();
    let value = serde_json::to_value(&set).unwrap();
    assert_eq!(value, json!({"__set__": true, "elements": ["abseil", "numpy", "zlib"]}));
  }

  #[test]
  fn stored_set_accepts_plain_lists() {
    let set: StoredSet<String> = serde_json::from_value(json!(["b", "a", "b"])).unwrap();
    assert_eq!(set.len(), 2);
    assert!(set.contains(&"a".to_string()));
  }

  #[test]
  fn stored_set_rejects_untagged_objects() {
    let result: Result<StoredSet<String>, _> = serde_json::from_value(json!({"elements": ["a"]}));
    assert!(result.is_err());
  }

  #[test]
  fn untyped_sets_are_normalized() {
    let a = dumps(&json!({"s": {"__set__": true, "elements": ["b", "a", "b"]}})).unwrap();
    let b = dumps(&json!({"s": {"__set__": true, "elements": ["a", "b"]}})).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn doc_ref_survives_decode_unresolved() {
    let text = dumps(&json!({"payload": DocRef::new("node_attrs", "numpy")})).unwrap();
    let value = loads("graph", "graph", &text).unwrap();
    let doc_ref = DocRef::from_value(&value["payload"]).unwrap();
    assert_eq!(doc_ref.address, "node_attrs/numpy.json");
    assert_eq!(
      doc_ref.target().unwrap(),
      ("node_attrs".to_string(), "numpy".to_string())
    );
  }

  #[test]
  fn doc_ref_requires_exact_shape() {
    assert!(DocRef::from_value(&json!({"__lazy_json__": "a/b.json", "x": 1})).is_none());
    assert!(DocRef::from_value(&json!({"__lazy_json__": 3})).is_none());
  }

  #[test]
  fn loads_reports_location_on_error() {
    let err = loads("node_attrs", "numpy", "{not json").unwrap_err();
    assert!(err.to_string().contains("node_attrs/numpy"));
  }
}
