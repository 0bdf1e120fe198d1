use anyhow::Result;

use storegc_lib::Handle;

use super::parse_path;
use crate::output::{OutputFormat, print_json, print_paths};

pub fn cmd_referrers(handle: &Handle, arg: &str, references: bool, output: OutputFormat) -> Result<()> {
  let store_dir = &handle.settings().store_dir;
  let path = parse_path(store_dir, arg)?;
  let store = handle.store();

  let related = if references {
    store.query_references(&path)?
  } else {
    store.query_referrers(&path)?
  };

  if output.is_json() {
    print_json(&related)
  } else {
    print_paths(store_dir, &related);
    Ok(())
  }
}
