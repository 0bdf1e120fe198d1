//! Deletion limits such as `100MiB`, `2G` or `12KI`.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityUnit {
  Bytes,
  Inodes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quantity {
  pub value: u64,
  pub unit: QuantityUnit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
  #[error("empty quantity")]
  Empty,

  #[error("ambiguous units for quantity '{0}'")]
  Ambiguous(String),

  #[error("invalid quantity '{input}': {reason}")]
  Invalid { input: String, reason: String },
}

impl Quantity {
  pub fn bytes(value: u64) -> Self {
    Self {
      value,
      unit: QuantityUnit::Bytes,
    }
  }

  pub fn inodes(value: u64) -> Self {
    Self {
      value,
      unit: QuantityUnit::Inodes,
    }
  }
}

impl FromStr for Quantity {
  type Err = QuantityError;

  /// A trailing uppercase `I` counts inodes; anything else is a size in bytes.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if s.is_empty() {
      return Err(QuantityError::Empty);
    }

    let (size, unit) = match s.strip_suffix('I') {
      Some(_) if s.to_ascii_lowercase().contains('b') => return Err(QuantityError::Ambiguous(s.to_string())),
      Some(rest) => (rest.trim_end(), QuantityUnit::Inodes),
      None => (s, QuantityUnit::Bytes),
    };

    Ok(Self {
      value: parse_size(size).map_err(|reason| QuantityError::Invalid {
        input: s.to_string(),
        reason,
      })?,
      unit,
    })
  }
}

impl fmt::Display for Quantity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.unit {
      QuantityUnit::Bytes => write!(f, "{} bytes", self.value),
      QuantityUnit::Inodes => write!(f, "{} inodes", self.value),
    }
  }
}

/// Parse `<number>[multiplier][b]`. Decimal multipliers are powers of 1000,
/// `Ki`-style ones powers of 1024.
fn parse_size(s: &str) -> Result<u64, String> {
  let split = s.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(s.len());
  let (number, suffix) = s.split_at(split);
  if number.is_empty() {
    return Err("missing number".to_string());
  }
  let number: f64 = number.parse().map_err(|_| format!("'{}' is not a number", number))?;

  let lower = suffix.trim().to_ascii_lowercase();
  let suffix = lower
    .strip_suffix("bytes")
    .or_else(|| lower.strip_suffix('b'))
    .unwrap_or(lower.as_str());

  let (prefix, binary) = match suffix.strip_suffix('i') {
    Some(prefix) => (prefix, true),
    None => (suffix, false),
  };
  let exponent = match prefix {
    "" if !binary => 0,
    "k" => 1,
    "m" => 2,
    "g" => 3,
    "t" => 4,
    "p" => 5,
    other => return Err(format!("unknown unit '{}'", other)),
  };
  let base: f64 = if binary { 1024.0 } else { 1000.0 };

  Ok((number * base.powi(exponent)).round() as u64)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(s: &str) -> Quantity {
    s.parse().unwrap()
  }

  #[test]
  fn bare_numbers_are_bytes() {
    assert_eq!(parse("5"), Quantity::bytes(5));
    assert_eq!(parse(" 42 "), Quantity::bytes(42));
  }

  #[test]
  fn decimal_and_binary_multipliers() {
    assert_eq!(parse("2G"), Quantity::bytes(2_000_000_000));
    assert_eq!(parse("2GB"), Quantity::bytes(2_000_000_000));
    assert_eq!(parse("100MiB"), Quantity::bytes(100 * 1024 * 1024));
    assert_eq!(parse("1.5k"), Quantity::bytes(1500));
    assert_eq!(parse("3 Ki"), Quantity::bytes(3072));
  }

  #[test]
  fn trailing_uppercase_i_means_inodes() {
    assert_eq!(parse("12KI"), Quantity::inodes(12_000));
    assert_eq!(parse("7I"), Quantity::inodes(7));
    assert_eq!(parse("2MiI"), Quantity::inodes(2 * 1024 * 1024));
  }

  #[test]
  fn bytes_and_inodes_together_are_ambiguous() {
    assert_eq!(
      "3BI".parse::<Quantity>(),
      Err(QuantityError::Ambiguous("3BI".to_string()))
    );
    assert!(matches!("1kbI".parse::<Quantity>(), Err(QuantityError::Ambiguous(_))));
  }

  #[test]
  fn rejects_garbage() {
    assert_eq!("".parse::<Quantity>(), Err(QuantityError::Empty));
    assert!(matches!("MiB".parse::<Quantity>(), Err(QuantityError::Invalid { .. })));
    assert!(matches!("10X".parse::<Quantity>(), Err(QuantityError::Invalid { .. })));
    assert!(matches!("1.2.3".parse::<Quantity>(), Err(QuantityError::Invalid { .. })));
    assert!(matches!("5i".parse::<Quantity>(), Err(QuantityError::Invalid { .. })));
  }

  #[test]
  fn display_names_the_unit() {
    assert_eq!(parse("10").to_string(), "10 bytes");
    assert_eq!(parse("10I").to_string(), "10 inodes");
  }
}
