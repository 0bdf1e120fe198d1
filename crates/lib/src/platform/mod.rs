//! Platform-specific default locations.

pub mod paths;
