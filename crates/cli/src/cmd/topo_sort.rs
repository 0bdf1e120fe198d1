use std::collections::BTreeSet;

use anyhow::{Context, Result};

use storegc_lib::Handle;

use super::parse_paths;
use crate::output::{OutputFormat, print_json, print_paths};

/// Print `args` with every path after the paths it references.
pub fn cmd_topo_sort(handle: &Handle, args: &[String], output: OutputFormat) -> Result<()> {
  let store_dir = &handle.settings().store_dir;
  let paths: BTreeSet<_> = parse_paths(store_dir, args)?.into_iter().collect();

  let sorted = handle
    .store()
    .topo_sort_paths(&paths)
    .context("Failed to sort paths")?;

  if output.is_json() {
    print_json(&sorted)
  } else {
    print_paths(store_dir, &sorted);
    Ok(())
  }
}
