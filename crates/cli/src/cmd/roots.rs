use anyhow::Result;

use storegc_lib::Handle;
use storegc_lib::store::StoreError;

use crate::output::{OutputFormat, print_json, print_paths};

pub fn cmd_roots(handle: &Handle, output: OutputFormat) -> Result<()> {
  let store = handle.store();
  let gc = store
    .gc_capability()
    .ok_or_else(|| StoreError::GcUnsupported(store.uri()))?;
  let roots = gc.root_set()?;

  if output.is_json() {
    print_json(&roots)
  } else {
    print_paths(&handle.settings().store_dir, &roots);
    Ok(())
  }
}
