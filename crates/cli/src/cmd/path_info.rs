use std::time::{Duration, UNIX_EPOCH};

use anyhow::{Context, Result};

use storegc_lib::Handle;
use storegc_lib::store::PathInfo;

use super::parse_paths;
use crate::output::{OutputFormat, format_bytes, print_json, print_stat};

pub fn cmd_path_info(handle: &Handle, args: &[String], output: OutputFormat) -> Result<()> {
  let store_dir = &handle.settings().store_dir;
  let paths = parse_paths(store_dir, args)?;
  let store = handle.store();

  // Queries start on the worker pool right away and are awaited in order.
  let pending: Vec<_> = paths.iter().map(|p| store.query_path_info_deferred(p)).collect();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let infos: Vec<PathInfo> = rt.block_on(async {
    let mut infos = Vec::with_capacity(pending.len());
    for query in pending {
      infos.push(query.await?);
    }
    Ok::<_, storegc_lib::store::StoreError>(infos)
  })?;

  if output.is_json() {
    return print_json(&infos);
  }

  for (i, info) in infos.iter().enumerate() {
    if i > 0 {
      println!();
    }
    println!("{}", info.path.to_absolute(store_dir).display());
    print_stat("NAR size", &format_bytes(info.nar_size));
    let registered = UNIX_EPOCH + Duration::from_secs(info.registration_time);
    print_stat("Registered", &humantime::format_rfc3339_seconds(registered).to_string());
    print_stat("Ultimate", &info.ultimate.to_string());
    if let Some(deriver) = &info.deriver {
      print_stat("Deriver", deriver.as_str());
    }
    if info.references.is_empty() {
      print_stat("References", "none");
    } else {
      print_stat("References", &info.references.len().to_string());
      for reference in &info.references {
        println!("    {}", reference);
      }
    }
  }

  Ok(())
}
