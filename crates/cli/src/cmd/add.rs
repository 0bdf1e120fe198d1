//! Adding objects to the store.
//!
//! Names ending in `.drv` are recorded as derivations together with the
//! outputs they declare. Contents come from a file, or stdin when no file is
//! given.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde_json::json;

use storegc_lib::Handle;
use storegc_lib::consts::DRV_EXTENSION;
use storegc_lib::store::StorePath;

use super::parse_paths;
use crate::output::{OutputFormat, print_json, print_stat};

#[derive(Debug, Args)]
pub struct AddArgs {
  /// Name part of the new store path
  pub name: String,

  /// File holding the contents; reads stdin if omitted
  pub file: Option<PathBuf>,

  /// Path the new object references (repeatable)
  #[arg(short, long = "reference", value_name = "PATH")]
  pub references: Vec<String>,

  /// Output a derivation declares (repeatable, default: out)
  #[arg(long = "drv-output", value_name = "NAME")]
  pub drv_outputs: Vec<String>,

  /// Also register the new path as a GC root under this name
  #[arg(long, value_name = "NAME")]
  pub root: Option<String>,
}

pub fn cmd_add(handle: &Handle, args: &AddArgs, output: OutputFormat) -> Result<()> {
  let store_dir = &handle.settings().store_dir;
  let store = handle.store();
  let references: BTreeSet<StorePath> = parse_paths(store_dir, &args.references)?.into_iter().collect();

  let contents = match &args.file {
    Some(file) => std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?,
    None => {
      let mut buf = Vec::new();
      std::io::stdin().read_to_end(&mut buf).context("Failed to read stdin")?;
      buf
    }
  };

  let is_drv = args.name.ends_with(DRV_EXTENSION);
  if !is_drv && !args.drv_outputs.is_empty() {
    bail!("--drv-output requires a name ending in '{}'", DRV_EXTENSION);
  }

  let (path, outputs) = if is_drv {
    let names: Vec<&str> = if args.drv_outputs.is_empty() {
      vec!["out"]
    } else {
      args.drv_outputs.iter().map(String::as_str).collect()
    };
    let drv = store
      .add_derivation(&args.name, &contents, &references, &names)
      .context("Failed to add derivation")?;
    (drv.path, drv.outputs)
  } else {
    let path = store
      .add_text(&args.name, &contents, &references)
      .context("Failed to add object")?;
    (path, BTreeMap::new())
  };

  if let Some(root) = &args.root {
    store
      .add_root(root, &path)
      .with_context(|| format!("Failed to register root '{}'", root))?;
  }

  if output.is_json() {
    return print_json(&json!({
      "path": path,
      "outputs": outputs,
      "root": args.root,
    }));
  }

  println!("{}", path.to_absolute(store_dir).display());
  for (name, output_path) in &outputs {
    print_stat(name, output_path.as_str());
  }
  Ok(())
}
