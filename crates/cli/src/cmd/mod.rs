mod add;
mod delete;
mod gc;
mod heuristic;
mod outputs;
mod path_info;
mod referrers;
mod roots;
mod topo_sort;

pub use add::{AddArgs, cmd_add};
pub use delete::cmd_delete;
pub use gc::cmd_gc;
pub use heuristic::{HeuristicArgs, cmd_heuristic};
pub use outputs::cmd_outputs;
pub use path_info::cmd_path_info;
pub use referrers::cmd_referrers;
pub use roots::cmd_roots;
pub use topo_sort::cmd_topo_sort;

use std::path::Path;

use anyhow::{Context, Result};

use storegc_lib::store::StorePath;

/// Accept `<hash>-<name>` or an absolute path below the store directory.
fn parse_path(store_dir: &Path, arg: &str) -> Result<StorePath> {
  let candidate = Path::new(arg);
  let path = if candidate.is_absolute() {
    StorePath::from_absolute(store_dir, candidate)
  } else {
    StorePath::parse(arg)
  };
  path.with_context(|| format!("Invalid store path '{}'", arg))
}

fn parse_paths(store_dir: &Path, args: &[String]) -> Result<Vec<StorePath>> {
  args.iter().map(|arg| parse_path(store_dir, arg)).collect()
}
