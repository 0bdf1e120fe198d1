//! storegc-lib: a content-addressed object store with reference tracking
//! and garbage collection.
//!
//! - `store`: store paths, path metadata, repositories and the `Store` facade
//! - `graph`: the reference graph with closure, topological sort and cycle search
//! - `gc`: root-based collection with keep-outputs / keep-derivations policy
//! - `heuristic`: limit-driven selection of least-recently-used garbage

pub mod consts;
pub mod gc;
pub mod graph;
pub mod heuristic;
pub mod init;
pub mod platform;
pub mod settings;
pub mod store;
pub mod store_lock;
pub mod util;

pub use init::{Handle, InitError, init};
