//! Hashing utilities for content-addressed storage.
//!
//! This module provides:
//! - `ContentHash`: A full 64-character SHA-256 hash of object contents
//! - `hash_bytes()`: Arbitrary byte hashing
//! - `fingerprint_digest()`: The 20-byte digest behind a store path hash
//! - `base32_encode()`: The store path flavour of base-32

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::{BASE32_ALPHABET, STORE_PATH_HASH_BYTES};

/// A full 64-character SHA256 hash of object contents.
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

/// Hash arbitrary bytes.
///
/// Returns the full 64-character SHA256 hash.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}

/// Hash a store path fingerprint and fold the digest down to the store path hash size.
///
/// The SHA-256 digest is XOR-folded into `STORE_PATH_HASH_BYTES` bytes so every
/// input byte influences the result.
pub fn fingerprint_digest(fingerprint: &str) -> [u8; STORE_PATH_HASH_BYTES] {
  let digest = Sha256::digest(fingerprint.as_bytes());
  let mut folded = [0u8; STORE_PATH_HASH_BYTES];
  for (i, byte) in digest.iter().enumerate() {
    folded[i % STORE_PATH_HASH_BYTES] ^= byte;
  }
  folded
}

/// Length of the base-32 rendering of `len` bytes.
pub fn base32_len(len: usize) -> usize {
  if len == 0 { 0 } else { (len * 8 - 1) / 5 + 1 }
}

/// Encode bytes in the store path base-32 alphabet.
///
/// Characters are emitted most significant first, reading the input as a
/// little-endian number, which matches the layout of existing store paths.
pub fn base32_encode(bytes: &[u8]) -> String {
  let len = base32_len(bytes.len());
  let mut out = String::with_capacity(len);

  for n in (0..len).rev() {
    let bit = n * 5;
    let i = bit / 8;
    let j = bit % 8;
    let low = u16::from(bytes[i]) >> j;
    let high = if i + 1 < bytes.len() {
      u16::from(bytes[i + 1]) << (8 - j)
    } else {
      0
    };
    out.push(BASE32_ALPHABET[usize::from((low | high) & 0x1f)] as char);
  }

  out
}

/// Returns true if every character of `s` belongs to the base-32 alphabet.
pub fn is_base32(s: &str) -> bool {
  s.bytes().all(|b| BASE32_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hash_bytes_is_hex_sha256() {
    let hash = hash_bytes(b"hello world");
    assert_eq!(
      hash.0,
      "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );
  }

  #[test]
  fn base32_of_twenty_bytes_is_thirty_two_chars() {
    let encoded = base32_encode(&[0xff; STORE_PATH_HASH_BYTES]);
    assert_eq!(encoded.len(), 32);
    assert!(is_base32(&encoded));
  }

  #[test]
  fn base32_of_zero_bytes_is_all_zero_digits() {
    assert_eq!(base32_encode(&[0u8; STORE_PATH_HASH_BYTES]), "0".repeat(32));
  }

  #[test]
  fn base32_low_bits_end_up_last() {
    let mut bytes = [0u8; STORE_PATH_HASH_BYTES];
    bytes[0] = 1;
    let encoded = base32_encode(&bytes);
    assert!(encoded.ends_with('1'));
    assert_eq!(&encoded[..31], "0".repeat(31));
  }

  #[test]
  fn base32_alphabet_excludes_ambiguous_letters() {
    assert!(is_base32("0123456789abcdfghijklmnpqrsvwxyz"));
    assert!(!is_base32("e"));
    assert!(!is_base32("o"));
    assert!(!is_base32("u"));
    assert!(!is_base32("t"));
    assert!(!is_base32("A"));
  }

  #[test]
  fn fingerprint_digest_is_deterministic() {
    assert_eq!(fingerprint_digest("text:sha256:abc:foo"), fingerprint_digest("text:sha256:abc:foo"));
    assert_ne!(fingerprint_digest("text:sha256:abc:foo"), fingerprint_digest("text:sha256:abc:bar"));
  }
}
