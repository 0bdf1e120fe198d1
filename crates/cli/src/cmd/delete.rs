//! Deletion of named paths.
//!
//! Only paths that are dead and not referenced by any surviving path are
//! removed; everything else is reported and makes the command fail.

use anyhow::{Context, Result, bail};
use serde_json::json;

use storegc_lib::Handle;
use storegc_lib::gc::GcOptions;

use super::parse_paths;
use crate::output::{OutputFormat, format_bytes, print_error, print_info, print_json, print_stat, print_success};
use crate::prompts::confirm;

pub fn cmd_delete(handle: &Handle, args: &[String], force: bool, output: OutputFormat) -> Result<()> {
  let store_dir = &handle.settings().store_dir;
  let paths = parse_paths(store_dir, args)?;

  if !confirm(&format!("Delete {} path(s)?", paths.len()), force)? {
    print_info("Aborted.");
    return Ok(());
  }

  let results = handle
    .store()
    .collect_garbage(&GcOptions::delete_specific(paths))
    .context("Deletion failed")?;

  if output.is_json() {
    print_json(&json!({
      "deleted": results.paths,
      "bytes_freed": results.bytes_freed,
      "rejected": results.rejected,
    }))?;
  } else {
    for path in &results.paths {
      print_success(&format!("deleted {}", path.to_absolute(store_dir).display()));
    }
    for rejected in &results.rejected {
      print_error(&rejected.to_string());
    }
    print_stat("Space freed", &format_bytes(results.bytes_freed));
  }

  if !results.rejected.is_empty() {
    bail!("{} path(s) could not be deleted", results.rejected.len());
  }
  Ok(())
}
