use anyhow::Result;
use owo_colors::{OwoColorize, Stream};

use storegc_lib::Handle;

use super::parse_path;
use crate::output::{OutputFormat, print_json, symbols};

pub fn cmd_outputs(handle: &Handle, arg: &str, output: OutputFormat) -> Result<()> {
  let store_dir = &handle.settings().store_dir;
  let drv = parse_path(store_dir, arg)?;
  let outputs = handle.store().query_derivation_output_map(&drv)?;

  if output.is_json() {
    return print_json(&outputs);
  }

  for (name, path) in &outputs {
    println!(
      "{} {} {}",
      name.if_supports_color(Stream::Stdout, |s| s.bold()),
      symbols::ARROW,
      path.to_absolute(store_dir).display()
    );
  }
  Ok(())
}
