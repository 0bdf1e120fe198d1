//! Access-time and inode statistics for store objects.

use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use walkdir::WalkDir;

/// Aggregated statistics for everything below one store object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatAgg {
  /// Latest access time (Unix seconds) of any non-directory entry.
  pub max_atime: i64,
  /// Number of entries, directories included.
  pub inodes: u64,
}

impl StatAgg {
  /// What an entry we cannot inspect counts as.
  pub const UNREADABLE: StatAgg = StatAgg {
    max_atime: 0,
    inodes: 1,
  };

  fn merge(self, other: StatAgg) -> StatAgg {
    StatAgg {
      max_atime: self.max_atime.max(other.max_atime),
      inodes: self.inodes + other.inodes,
    }
  }
}

/// Walk `path` without following symlinks.
///
/// Directory access times are ignored since walking them updates them.
pub fn path_stat_agg(path: &Path) -> io::Result<StatAgg> {
  let metadata = fs::symlink_metadata(path)?;
  if !metadata.is_dir() {
    return Ok(StatAgg {
      max_atime: atime(&metadata),
      inodes: 1,
    });
  }

  let mut agg = StatAgg::default();
  for entry in WalkDir::new(path).follow_links(false) {
    let entry_agg = match entry {
      Ok(entry) if entry.file_type().is_dir() => StatAgg {
        max_atime: 0,
        inodes: 1,
      },
      Ok(entry) => match entry.metadata() {
        Ok(metadata) => StatAgg {
          max_atime: atime(&metadata),
          inodes: 1,
        },
        Err(_) => StatAgg::UNREADABLE,
      },
      Err(_) => StatAgg::UNREADABLE,
    };
    agg = agg.merge(entry_agg);
  }

  Ok(agg)
}

fn atime(metadata: &fs::Metadata) -> i64 {
  metadata
    .accessed()
    .ok()
    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
    .map_or(0, |d| d.as_secs() as i64)
}
