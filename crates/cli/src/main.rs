mod cmd;
mod output;
mod prompts;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use storegc_lib::heuristic::{Quantity, QuantityUnit};
use storegc_lib::settings::Settings;

use cmd::{AddArgs, HeuristicArgs};
use output::OutputFormat;

/// storegc - content-addressed store with reference-tracking garbage collection
#[derive(Parser)]
#[command(name = "storegc")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true, conflicts_with = "quiet")]
  verbose: bool,

  /// Only log warnings and errors
  #[arg(short, long, global = true)]
  quiet: bool,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  /// Config file (default: $STOREGC_CONFIG or the platform config directory)
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Delete every path not reachable from a GC root
  Gc {
    /// List the paths that would be deleted without deleting them
    #[arg(long, conflicts_with = "print_live")]
    dry_run: bool,

    /// List the paths reachable from GC roots
    #[arg(long)]
    print_live: bool,

    /// Stop after freeing this much space (e.g. 500M, 2GiB)
    #[arg(long, value_name = "SIZE", value_parser = parse_bytes)]
    max_freed: Option<u64>,
  },

  /// Delete specific paths if nothing live still needs them
  Delete {
    /// Store paths, as <hash>-<name> or absolute paths
    #[arg(required = true)]
    paths: Vec<String>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    force: bool,
  },

  /// Free roughly LIMIT bytes or inodes, least recently used garbage first
  Heuristic(HeuristicArgs),

  /// Show metadata of valid paths
  PathInfo {
    #[arg(required = true)]
    paths: Vec<String>,
  },

  /// List the paths that reference a path
  Referrers {
    path: String,

    /// List the paths it references instead
    #[arg(short, long)]
    references: bool,
  },

  /// Print paths so that references come before their referrers
  TopoSort {
    #[arg(required = true)]
    paths: Vec<String>,
  },

  /// Show the outputs a derivation declares
  Outputs { drv: String },

  /// Add an object to the store
  Add(AddArgs),

  /// List the GC roots
  Roots,
}

fn parse_bytes(s: &str) -> Result<u64, String> {
  let quantity: Quantity = s.parse().map_err(|e: storegc_lib::heuristic::QuantityError| e.to_string())?;
  match quantity.unit {
    QuantityUnit::Bytes => Ok(quantity.value),
    QuantityUnit::Inodes => Err("expected a size in bytes".to_string()),
  }
}

fn init_tracing(verbose: bool, quiet: bool) {
  let default = if verbose {
    "debug"
  } else if quiet {
    "warn"
  } else {
    "info"
  };

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.verbose, cli.quiet);

  let settings = Settings::load_from(cli.config.as_deref()).context("Failed to load settings")?;
  let handle = storegc_lib::init(settings).context("Failed to open store")?;
  let output = cli.output;

  match cli.command {
    Commands::Gc {
      dry_run,
      print_live,
      max_freed,
    } => cmd::cmd_gc(&handle, dry_run, print_live, max_freed, output),
    Commands::Delete { paths, force } => cmd::cmd_delete(&handle, &paths, force, output),
    Commands::Heuristic(args) => cmd::cmd_heuristic(&handle, &args, output),
    Commands::PathInfo { paths } => cmd::cmd_path_info(&handle, &paths, output),
    Commands::Referrers { path, references } => cmd::cmd_referrers(&handle, &path, references, output),
    Commands::TopoSort { paths } => cmd::cmd_topo_sort(&handle, &paths, output),
    Commands::Outputs { drv } => cmd::cmd_outputs(&handle, &drv, output),
    Commands::Add(args) => cmd::cmd_add(&handle, &args, output),
    Commands::Roots => cmd::cmd_roots(&handle, output),
  }
}
