use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::json;

use storegc_lib::Handle;
use storegc_lib::gc::{GcAction, GcOptions};

use crate::output::{
  OutputFormat, format_bytes, format_duration, print_json, print_paths, print_stat, print_success, print_warning,
};

pub fn cmd_gc(handle: &Handle, dry_run: bool, print_live: bool, max_freed: Option<u64>, output: OutputFormat) -> Result<()> {
  let start = Instant::now();

  let mut options = if print_live {
    GcOptions::return_live()
  } else if dry_run {
    GcOptions::return_dead()
  } else {
    GcOptions::delete_dead()
  };
  options.max_freed = max_freed;

  let results = handle
    .store()
    .collect_garbage(&options)
    .context("Garbage collection failed")?;

  if output.is_json() {
    return print_json(&json!({
      "action": options.action,
      "paths": results.paths,
      "bytes_freed": results.bytes_freed,
      "rejected": results.rejected,
    }));
  }

  let store_dir = &handle.settings().store_dir;
  if !options.action.deletes() {
    print_paths(store_dir, &results.paths);
    return Ok(());
  }

  for rejected in &results.rejected {
    print_warning(&rejected.to_string());
  }
  println!();
  print_success("Garbage collection complete!");
  print_stat("Paths deleted", &results.paths.len().to_string());
  print_stat("Space freed", &format_bytes(results.bytes_freed));
  if options.action == GcAction::DeleteDead && max_freed.is_some_and(|limit| results.bytes_freed >= limit) {
    print_stat("Stopped", "reached --max-freed");
  }
  print_stat("Duration", &format_duration(start.elapsed()));

  Ok(())
}
