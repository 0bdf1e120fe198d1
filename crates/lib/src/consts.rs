//! Constants shared across the crate.

pub const APP_NAME: &str = "storegc";

/// Number of base-32 characters in the hash part of a store path.
pub const STORE_PATH_HASH_LEN: usize = 32;

/// Number of digest bytes encoded in the hash part of a store path.
pub const STORE_PATH_HASH_BYTES: usize = 20;

pub const STORE_PATH_MAX_NAME_LEN: usize = 211;

/// Alphabet of the base-32 encoding used for store path hashes (omits e, o, u, t).
pub const BASE32_ALPHABET: &[u8; 32] = b"0123456789abcdfghijklmnpqrsvwxyz";

pub const DRV_EXTENSION: &str = ".drv";

/// Friendly penalty weight applied when a flag is given without an explicit weight.
pub const DEFAULT_FRIENDLY_WEIGHT: u32 = 5;
