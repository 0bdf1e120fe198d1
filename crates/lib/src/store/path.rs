//! Store path identity.
//!
//! A store path is rendered `<hash>-<name>` where `<hash>` is 32 base-32
//! characters derived from the object's content and type, and `<name>` is a
//! human-readable suffix.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::consts::{DRV_EXTENSION, STORE_PATH_HASH_LEN, STORE_PATH_MAX_NAME_LEN};
use crate::util::hash::{ContentHash, base32_encode, fingerprint_digest, is_base32};

use super::error::StoreError;

/// Immutable identity of a stored object.
///
/// Equality, ordering and hashing are all structural over the encoded string,
/// so ordering is lexicographic over `<hash>-<name>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorePath(String);

/// What kind of object a store path is being computed for.
///
/// The kind becomes the type tag of the path fingerprint, so the same bytes
/// stored as different kinds never collide.
#[derive(Debug, Clone, Copy)]
pub enum PathKind<'a> {
  /// A plain object whose references are part of its identity.
  Text { references: &'a BTreeSet<StorePath> },
  /// An object imported verbatim from outside the store.
  Source,
  /// A named output of a derivation.
  Output { name: &'a str },
}

impl PathKind<'_> {
  fn type_tag(&self) -> String {
    match self {
      PathKind::Text { references } => {
        let mut tag = String::from("text");
        for reference in references.iter() {
          tag.push(':');
          tag.push_str(reference.as_str());
        }
        tag
      }
      PathKind::Source => "source".to_string(),
      PathKind::Output { name } => format!("output:{}", name),
    }
  }
}

impl StorePath {
  /// Parse a `<hash>-<name>` string.
  pub fn parse(s: &str) -> Result<Self, StoreError> {
    let invalid = |reason: &str| StoreError::InvalidPathFormat {
      path: s.to_string(),
      reason: reason.to_string(),
    };

    if s.len() < STORE_PATH_HASH_LEN + 2 {
      return Err(invalid("path is too short"));
    }

    let (Some(hash), Some(rest)) = (s.get(..STORE_PATH_HASH_LEN), s.get(STORE_PATH_HASH_LEN..)) else {
      return Err(invalid("hash part is not valid base-32"));
    };
    if !is_base32(hash) {
      return Err(invalid("hash part is not valid base-32"));
    }

    let Some(name) = rest.strip_prefix('-') else {
      return Err(invalid("expected '-' after the hash part"));
    };
    validate_name(name).map_err(|reason| invalid(&reason))?;

    Ok(Self(s.to_string()))
  }

  /// Build a store path from an already encoded hash and a name.
  pub fn from_parts(hash: &str, name: &str) -> Result<Self, StoreError> {
    Self::parse(&format!("{}-{}", hash, name))
  }

  /// Compute the path of an object from its content hash, kind and name.
  ///
  /// The fingerprint is `<type>:sha256:<content hash>:<name>`, hashed and
  /// folded down to the store path hash size.
  pub fn from_content(kind: PathKind<'_>, content: &ContentHash, name: &str) -> Result<Self, StoreError> {
    let fingerprint = format!("{}:sha256:{}:{}", kind.type_tag(), content, name);
    let hash = base32_encode(&fingerprint_digest(&fingerprint));
    Self::from_parts(&hash, name)
  }

  /// Parse an absolute path that lives inside `store_dir`.
  ///
  /// Anything below the top-level store entry is ignored, so
  /// `/store/<hash>-foo/bin/foo` yields `<hash>-foo`.
  pub fn from_absolute(store_dir: &Path, path: &Path) -> Result<Self, StoreError> {
    let not_in_store = || StoreError::InvalidPathFormat {
      path: path.display().to_string(),
      reason: format!("not inside the store directory {}", store_dir.display()),
    };

    let relative = path.strip_prefix(store_dir).map_err(|_| not_in_store())?;
    match relative.components().next() {
      Some(Component::Normal(entry)) => {
        let entry = entry.to_str().ok_or_else(not_in_store)?;
        Self::parse(entry)
      }
      _ => Err(not_in_store()),
    }
  }

  /// Location of this path's object inside `store_dir`.
  pub fn to_absolute(&self, store_dir: &Path) -> PathBuf {
    store_dir.join(&self.0)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn hash_part(&self) -> &str {
    &self.0[..STORE_PATH_HASH_LEN]
  }

  pub fn name(&self) -> &str {
    &self.0[STORE_PATH_HASH_LEN + 1..]
  }

  /// Whether this path identifies a derivation record.
  pub fn is_derivation(&self) -> bool {
    self.0.ends_with(DRV_EXTENSION)
  }
}

fn validate_name(name: &str) -> Result<(), String> {
  if name.is_empty() {
    return Err("name is empty".to_string());
  }
  if name.len() > STORE_PATH_MAX_NAME_LEN {
    return Err(format!("name is longer than {} characters", STORE_PATH_MAX_NAME_LEN));
  }
  if name.starts_with('.') {
    return Err("name must not start with '.'".to_string());
  }
  if let Some(c) = name
    .chars()
    .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.' | '_' | '?' | '=')))
  {
    return Err(format!("name contains forbidden character '{}'", c));
  }
  Ok(())
}

impl fmt::Display for StorePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl FromStr for StorePath {
  type Err = StoreError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl TryFrom<String> for StorePath {
  type Error = StoreError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::parse(&value)
  }
}

impl From<StorePath> for String {
  fn from(path: StorePath) -> Self {
    path.0
  }
}

impl AsRef<str> for StorePath {
  fn as_ref(&self) -> &str {
    &self.0
  }
}
