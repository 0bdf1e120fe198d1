//! Validity records for stored objects.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::path::StorePath;

/// Metadata and outgoing references of one valid store path.
///
/// References are kept sorted so records serialize deterministically. A path
/// may list itself as a reference; graph algorithms treat that edge as a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathInfo {
  pub path: StorePath,
  #[serde(default)]
  pub references: BTreeSet<StorePath>,
  /// Unix timestamp (seconds) at which the path was registered.
  pub registration_time: u64,
  /// True if the object was produced locally rather than fetched.
  #[serde(default)]
  pub ultimate: bool,
  pub nar_size: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deriver: Option<StorePath>,
}

impl PathInfo {
  /// Create a record registered now with no references.
  pub fn new(path: StorePath, nar_size: u64) -> Self {
    Self {
      path,
      references: BTreeSet::new(),
      registration_time: now_unix(),
      ultimate: false,
      nar_size,
      deriver: None,
    }
  }

  pub fn with_references(mut self, references: impl IntoIterator<Item = StorePath>) -> Self {
    self.references = references.into_iter().collect();
    self
  }

  pub fn with_deriver(mut self, deriver: StorePath) -> Self {
    self.deriver = Some(deriver);
    self
  }

  pub fn with_ultimate(mut self, ultimate: bool) -> Self {
    self.ultimate = ultimate;
    self
  }

  pub fn references_self(&self) -> bool {
    self.references.contains(&self.path)
  }

  /// References other than the path itself.
  pub fn foreign_references(&self) -> impl Iterator<Item = &StorePath> {
    self.references.iter().filter(move |r| **r != self.path)
  }
}

pub(crate) fn now_unix() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn path(c: char, name: &str) -> StorePath {
    StorePath::parse(&format!("{}-{}", c.to_string().repeat(32), name)).unwrap()
  }

  #[test]
  fn foreign_references_skip_self() {
    let a = path('a', "a");
    let b = path('b', "b");
    let info = PathInfo::new(a.clone(), 10).with_references([a.clone(), b.clone()]);

    assert!(info.references_self());
    assert_eq!(info.foreign_references().cloned().collect::<Vec<_>>(), vec![b]);
  }

  #[test]
  fn json_omits_missing_deriver() {
    let info = PathInfo::new(path('a', "a"), 10);
    let json = serde_json::to_value(&info).unwrap();
    assert!(json.get("deriver").is_none());
    assert_eq!(json["nar_size"], 10);

    let back: PathInfo = serde_json::from_value(json).unwrap();
    assert_eq!(back, info);
  }

  #[test]
  fn json_defaults_optional_fields() {
    let json = serde_json::json!({
      "path": path('a', "a").to_string(),
      "registration_time": 1,
      "nar_size": 2,
    });
    let info: PathInfo = serde_json::from_value(json).unwrap();
    assert!(info.references.is_empty());
    assert!(!info.ultimate);
    assert!(info.deriver.is_none());
  }
}
