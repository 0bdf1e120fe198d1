//! Limit-driven collection.
//!
//! Penalty flags take an optional weight from 0 to 10. Given bare they use 5;
//! each step up or down scales the penalty by a factor of 7. A weight of 0 or
//! the matching `--no-penalize-*` flag turns the penalty off.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;

use storegc_lib::Handle;
use storegc_lib::heuristic::{FsPathStats, HeuristicOptions, Quantity, run};

use crate::output::{
  OutputFormat, format_bytes, format_duration, print_info, print_json, print_paths, print_stat, print_success,
  print_warning,
};

#[derive(Debug, Args)]
pub struct HeuristicArgs {
  /// Amount to free: a size such as 10G or 500MiB, or an inode count such as 20KI
  pub limit: Quantity,

  /// Prefer deleting paths a substituter can restore
  #[arg(long, value_name = "WEIGHT", num_args = 0..=1, default_missing_value = "5",
    value_parser = clap::value_parser!(u32).range(0..=10))]
  pub penalize_substitutable: Option<u32>,

  /// Turn off the substitutable penalty
  #[arg(long, conflicts_with = "penalize_substitutable")]
  pub no_penalize_substitutable: bool,

  /// Prefer deleting derivations
  #[arg(long, value_name = "WEIGHT", num_args = 0..=1, default_missing_value = "5",
    value_parser = clap::value_parser!(u32).range(0..=10))]
  pub penalize_drvs: Option<u32>,

  /// Turn off the derivation penalty
  #[arg(long, conflicts_with = "penalize_drvs")]
  pub no_penalize_drvs: bool,

  /// Prefer deleting paths with many inodes for their size
  #[arg(long, value_name = "WEIGHT", num_args = 0..=1, default_missing_value = "5",
    value_parser = clap::value_parser!(u32).range(0..=10))]
  pub penalize_inodes: Option<u32>,

  /// Turn off the inode penalty
  #[arg(long, conflicts_with = "penalize_inodes")]
  pub no_penalize_inodes: bool,

  /// Prefer deleting large paths
  #[arg(long, value_name = "WEIGHT", num_args = 0..=1, default_missing_value = "5",
    value_parser = clap::value_parser!(u32).range(0..=10))]
  pub penalize_size: Option<u32>,

  /// Turn off the size penalty
  #[arg(long, conflicts_with = "penalize_size")]
  pub no_penalize_size: bool,

  /// Avoid paths that would overshoot the remaining limit
  #[arg(long, value_name = "WEIGHT", num_args = 0..=1, default_missing_value = "5",
    value_parser = clap::value_parser!(u32).range(0..=10))]
  pub penalize_exceeding_limit: Option<u32>,

  /// Turn off the limit-excess penalty
  #[arg(long, conflicts_with = "penalize_exceeding_limit")]
  pub no_penalize_exceeding_limit: bool,

  /// Treat a path as accessed whenever one of its referrers was
  #[arg(long)]
  pub inherit_atime: bool,

  /// Only list what would be deleted
  #[arg(long)]
  pub dry_run: bool,

  /// Threads for reading access times; 0 runs on the main thread
  #[arg(short, long)]
  pub threads: Option<usize>,
}

impl HeuristicArgs {
  fn options(&self) -> HeuristicOptions {
    HeuristicOptions {
      penalize_substitutable: weight(self.penalize_substitutable, self.no_penalize_substitutable),
      penalize_drvs: weight(self.penalize_drvs, self.no_penalize_drvs),
      penalize_inodes: weight(self.penalize_inodes, self.no_penalize_inodes),
      penalize_size: weight(self.penalize_size, self.no_penalize_size),
      penalize_exceeding_limit: weight(self.penalize_exceeding_limit, self.no_penalize_exceeding_limit),
      inherit_atime: self.inherit_atime,
      threads: self.threads,
      dry_run: self.dry_run,
      ..HeuristicOptions::new(self.limit)
    }
  }
}

fn weight(value: Option<u32>, disabled: bool) -> u32 {
  if disabled { 0 } else { value.unwrap_or(0) }
}

pub fn cmd_heuristic(handle: &Handle, args: &HeuristicArgs, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let store_dir = &handle.settings().store_dir;

  let options = HeuristicOptions {
    workers: Some(Arc::clone(handle.workers())),
    ..args.options()
  };
  let stats = FsPathStats::new(store_dir);
  let report = run(handle.store(), &options, &stats).context("Heuristic collection failed")?;

  if output.is_json() {
    return print_json(&report);
  }

  if report.selected.is_empty() {
    print_info("Nothing to delete.");
    return Ok(());
  }

  print_paths(store_dir, report.selected.iter().map(|s| &s.path));
  for rejected in &report.rejected {
    print_warning(&rejected.to_string());
  }

  println!();
  if report.dry_run {
    print_info("Dry run - no changes made");
  } else {
    print_success("Heuristic collection complete!");
  }
  print_stat("Paths selected", &report.selected.len().to_string());
  print_stat("NAR size", &format_bytes(report.total_nar_size()));
  print_stat("Inodes", &report.total_inodes().to_string());
  if !report.dry_run {
    print_stat("Space freed", &format_bytes(report.bytes_freed));
  }
  print_stat("Duration", &format_duration(start.elapsed()));

  Ok(())
}
