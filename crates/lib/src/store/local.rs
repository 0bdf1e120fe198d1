//! Directory-backed repository.
//!
//! # Layout
//!
//! ```text
//! <store_dir>/<hash>-<name>              # object contents (file or directory)
//! <state_dir>/
//! ├── db/
//! │   ├── info/<hash>-<name>.json        # PathInfo
//! │   └── drv/<hash>-<name>.json         # declared derivation outputs
//! ├── gcroots/                           # symlinks or files naming roots
//! └── gc.lock                            # inter-process GC lock
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::settings::Settings;
use crate::store_lock::{LockMode, StoreLock};

use super::error::{StoreError, StoreResult};
use super::info::PathInfo;
use super::path::StorePath;
use super::repository::{GcCapability, Repository};

const INFO_DIR: &str = "db/info";
const DRV_DIR: &str = "db/drv";
const ROOTS_DIR: &str = "gcroots";
const LOCK_FILENAME: &str = "gc.lock";

#[derive(Debug, Serialize, Deserialize)]
struct DerivationRecord {
  outputs: BTreeMap<String, StorePath>,
}

#[derive(Debug, Clone)]
pub struct LocalRepository {
  store_dir: PathBuf,
  state_dir: PathBuf,
  substituters: Vec<PathBuf>,
  /// Shared by clones.
  exclusion: Arc<RwLock<()>>,
}

impl LocalRepository {
  /// Open the repository described by `settings`, creating its directories.
  pub fn open(settings: &Settings) -> StoreResult<Self> {
    let repo = Self {
      store_dir: settings.store_dir.clone(),
      state_dir: settings.state_dir.clone(),
      substituters: settings.substituters.clone(),
      exclusion: Arc::default(),
    };

    for dir in [
      repo.store_dir.clone(),
      repo.state_dir.join(INFO_DIR),
      repo.state_dir.join(DRV_DIR),
      repo.state_dir.join(ROOTS_DIR),
    ] {
      fs::create_dir_all(&dir).map_err(|e| repo.io_error(e))?;
    }

    debug!(store = %repo.store_dir.display(), state = %repo.state_dir.display(), "opened local repository");
    Ok(repo)
  }

  pub fn store_dir(&self) -> &Path {
    &self.store_dir
  }

  pub fn state_dir(&self) -> &Path {
    &self.state_dir
  }

  pub fn roots_dir(&self) -> PathBuf {
    self.state_dir.join(ROOTS_DIR)
  }

  fn info_path(&self, path: &StorePath) -> PathBuf {
    self.state_dir.join(INFO_DIR).join(format!("{}.json", path))
  }

  fn drv_path(&self, path: &StorePath) -> PathBuf {
    self.state_dir.join(DRV_DIR).join(format!("{}.json", path))
  }

  fn lock_path(&self) -> PathBuf {
    self.state_dir.join(LOCK_FILENAME)
  }

  fn io_error(&self, err: io::Error) -> StoreError {
    StoreError::unavailable(self.uri(), err)
  }

  fn read_json<T: for<'de> Deserialize<'de>>(&self, file: &Path, path: &StorePath) -> StoreResult<Option<T>> {
    let content = match fs::read_to_string(file) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(self.io_error(e)),
    };

    serde_json::from_str(&content)
      .map(Some)
      .map_err(|source| StoreError::Serialization {
        path: path.clone(),
        source,
      })
  }

  /// Write via a temporary file and rename so readers never see partial records.
  fn write_json<T: Serialize>(&self, file: &Path, path: &StorePath, value: &T) -> StoreResult<()> {
    let content = serde_json::to_string_pretty(value).map_err(|source| StoreError::Serialization {
      path: path.clone(),
      source,
    })?;

    let temp_path = file.with_extension("json.tmp");
    fs::write(&temp_path, content).map_err(|e| self.io_error(e))?;
    fs::rename(&temp_path, file).map_err(|e| self.io_error(e))?;
    Ok(())
  }

  fn remove_if_exists(&self, file: &Path) -> StoreResult<()> {
    match fs::remove_file(file) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(self.io_error(e)),
    }
  }

  fn remove_object(&self, object: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(object) {
      Ok(metadata) => metadata,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
      Err(e) => return Err(e),
    };

    if metadata.is_dir() {
      make_writable(object)?;
      fs::remove_dir_all(object)
    } else {
      fs::remove_file(object)
    }
  }

  /// Resolve a root entry to the store path it names.
  fn resolve_root(&self, entry: &Path) -> Option<StorePath> {
    let target = match fs::symlink_metadata(entry) {
      Ok(m) if m.file_type().is_symlink() => fs::read_link(entry).ok()?,
      Ok(m) if m.is_file() => PathBuf::from(fs::read_to_string(entry).ok()?.trim()),
      _ => return None,
    };

    if target.is_absolute() {
      StorePath::from_absolute(&self.store_dir, &target).ok()
    } else {
      StorePath::parse(target.to_str()?).ok()
    }
  }
}

/// Directories may have been made read-only after registration.
fn make_writable(dir: &Path) -> io::Result<()> {
  for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
    if entry.file_type().is_dir() {
      let mut permissions = entry.metadata().map_err(io::Error::other)?.permissions();
      if permissions.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        fs::set_permissions(entry.path(), permissions)?;
      }
    }
  }
  Ok(())
}

impl Repository for LocalRepository {
  fn uri(&self) -> String {
    format!("local://{}", self.store_dir.display())
  }

  fn lookup(&self, path: &StorePath) -> StoreResult<Option<PathInfo>> {
    let info: Option<PathInfo> = self.read_json(&self.info_path(path), path)?;
    Ok(info.filter(|info| info.path == *path))
  }

  fn enumerate_all(&self) -> StoreResult<BTreeSet<StorePath>> {
    let entries = fs::read_dir(self.state_dir.join(INFO_DIR)).map_err(|e| self.io_error(e))?;

    let mut paths = BTreeSet::new();
    for entry in entries.flatten() {
      let file_name = entry.file_name();
      let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(".json")) else {
        continue;
      };
      match StorePath::parse(stem) {
        Ok(path) => {
          paths.insert(path);
        }
        Err(e) => warn!(entry = %entry.path().display(), error = %e, "ignoring malformed metadata entry"),
      }
    }

    Ok(paths)
  }

  fn insert(&self, info: PathInfo) -> StoreResult<()> {
    let file = self.info_path(&info.path);
    self.write_json(&file, &info.path, &info)
  }

  fn derivation_outputs(&self, drv: &StorePath) -> StoreResult<Option<BTreeMap<String, StorePath>>> {
    let record: Option<DerivationRecord> = self.read_json(&self.drv_path(drv), drv)?;
    Ok(record.map(|r| r.outputs))
  }

  fn insert_derivation(&self, drv: &StorePath, outputs: BTreeMap<String, StorePath>) -> StoreResult<()> {
    self.write_json(&self.drv_path(drv), drv, &DerivationRecord { outputs })
  }

  fn substitutable(&self, candidates: &BTreeSet<StorePath>) -> StoreResult<BTreeSet<StorePath>> {
    let mut found = BTreeSet::new();
    for candidate in candidates {
      let offered = self
        .substituters
        .iter()
        .any(|dir| dir.join(format!("{}.narinfo", candidate.hash_part())).is_file());
      if offered {
        found.insert(candidate.clone());
      }
    }
    Ok(found)
  }

  fn write_contents(&self, path: &StorePath, contents: &[u8]) -> StoreResult<()> {
    fs::write(path.to_absolute(&self.store_dir), contents).map_err(|e| self.io_error(e))
  }

  fn object_dir(&self) -> Option<PathBuf> {
    Some(self.store_dir.clone())
  }

  fn exclusion(&self) -> &RwLock<()> {
    &self.exclusion
  }

  fn lock_shared(&self) -> StoreResult<Option<StoreLock>> {
    Ok(Some(StoreLock::acquire(&self.lock_path(), LockMode::Shared, "register")?))
  }

  fn gc_capability(&self) -> Option<&dyn GcCapability> {
    Some(self)
  }
}

impl GcCapability for LocalRepository {
  fn root_set(&self) -> StoreResult<BTreeSet<StorePath>> {
    let mut roots = BTreeSet::new();

    for entry in WalkDir::new(self.roots_dir()).min_depth(1) {
      let entry = match entry {
        Ok(entry) => entry,
        Err(e) => {
          warn!(error = %e, "failed to read GC root entry");
          continue;
        }
      };
      if entry.file_type().is_dir() {
        continue;
      }

      match self.resolve_root(entry.path()) {
        Some(path) => {
          roots.insert(path);
        }
        None => warn!(root = %entry.path().display(), "ignoring GC root that does not name a store path"),
      }
    }

    debug!(count = roots.len(), "collected GC roots");
    Ok(roots)
  }

  fn add_root(&self, name: &str, path: &StorePath) -> StoreResult<()> {
    let relative = Path::new(name);
    let contained = relative.components().next().is_some()
      && relative.components().all(|c| matches!(c, Component::Normal(_)));
    if !contained {
      return Err(StoreError::InvalidPathFormat {
        path: name.to_string(),
        reason: "root names must be relative paths below the roots directory".to_string(),
      });
    }
    let root = self.roots_dir().join(relative);
    if let Some(parent) = root.parent() {
      fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
    }
    let temp_path = root.with_extension("tmp");
    fs::write(&temp_path, path.to_absolute(&self.store_dir).to_string_lossy().as_bytes())
      .map_err(|e| self.io_error(e))?;
    fs::rename(&temp_path, &root).map_err(|e| self.io_error(e))
  }

  fn delete(&self, path: &StorePath) -> StoreResult<()> {
    let object = path.to_absolute(&self.store_dir);
    if let Err(e) = self.remove_object(&object) {
      return Err(
        super::error::PathInUse {
          path: path.clone(),
          reason: super::error::InUseReason::Repository { message: e.to_string() },
        }
        .into(),
      );
    }

    self.remove_if_exists(&self.drv_path(path))?;
    self.remove_if_exists(&self.info_path(path))?;
    debug!(path = %path, "deleted store path");
    Ok(())
  }

  fn lock_exclusive(&self) -> StoreResult<Option<StoreLock>> {
    Ok(Some(StoreLock::acquire(&self.lock_path(), LockMode::Exclusive, "gc")?))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::path;
  use tempfile::TempDir;

  fn open(temp: &TempDir) -> LocalRepository {
    let settings = Settings {
      store_dir: temp.path().join("store"),
      state_dir: temp.path().join("var"),
      substituters: vec![temp.path().join("cache")],
      ..Settings::default()
    };
    LocalRepository::open(&settings).unwrap()
  }

  #[test]
  fn insert_then_lookup_and_enumerate() {
    let temp = TempDir::new().unwrap();
    let repo = open(&temp);
    let a = path("a");
    let b = path("b");

    repo.insert(PathInfo::new(b.clone(), 3)).unwrap();
    repo.insert(PathInfo::new(a.clone(), 5).with_references([b.clone()])).unwrap();

    assert_eq!(repo.lookup(&a).unwrap().unwrap().nar_size, 5);
    assert_eq!(repo.enumerate_all().unwrap(), BTreeSet::from([a.clone(), b.clone()]));
    assert_eq!(repo.referrers(&b).unwrap(), BTreeSet::from([a]));
  }

  #[test]
  fn lookup_of_missing_path_is_none() {
    let temp = TempDir::new().unwrap();
    let repo = open(&temp);
    assert!(repo.lookup(&path("missing")).unwrap().is_none());
  }

  #[test]
  fn malformed_metadata_is_a_serialization_error() {
    let temp = TempDir::new().unwrap();
    let repo = open(&temp);
    let a = path("a");
    fs::write(repo.info_path(&a), "{ not json").unwrap();

    assert!(matches!(repo.lookup(&a), Err(StoreError::Serialization { .. })));
  }

  #[test]
  fn roots_resolve_from_files_and_symlinks() {
    let temp = TempDir::new().unwrap();
    let repo = open(&temp);
    let a = path("a");
    let b = path("b");

    repo.add_root("profile", &a).unwrap();
    #[cfg(unix)]
    std::os::unix::fs::symlink(b.to_absolute(repo.store_dir()), repo.roots_dir().join("result")).unwrap();
    #[cfg(not(unix))]
    fs::write(repo.roots_dir().join("result"), b.as_str()).unwrap();
    fs::write(repo.roots_dir().join("junk"), "not a store path").unwrap();

    assert_eq!(repo.root_set().unwrap(), BTreeSet::from([a, b]));
  }

  #[test]
  fn root_names_cannot_leave_the_roots_directory() {
    let temp = TempDir::new().unwrap();
    let repo = open(&temp);
    let a = path("a");

    for name in ["../../escaped", "../escaped", "", "/tmp/escaped", "nested/../../escaped"] {
      assert!(
        matches!(repo.add_root(name, &a), Err(StoreError::InvalidPathFormat { .. })),
        "accepted root name {:?}",
        name
      );
    }
    assert!(!temp.path().join("escaped").exists());
    assert!(!temp.path().join("var").join("escaped").exists());

    repo.add_root("profiles/default", &a).unwrap();
    assert_eq!(repo.root_set().unwrap(), BTreeSet::from([a]));
  }

  #[test]
  fn delete_removes_object_and_metadata() {
    let temp = TempDir::new().unwrap();
    let repo = open(&temp);
    let a = path("a");

    repo.write_contents(&a, b"hello").unwrap();
    repo.insert(PathInfo::new(a.clone(), 5)).unwrap();
    repo.insert_derivation(&a, BTreeMap::new()).unwrap();

    repo.delete(&a).unwrap();

    assert!(!a.to_absolute(repo.store_dir()).exists());
    assert!(repo.lookup(&a).unwrap().is_none());
    assert!(repo.derivation_outputs(&a).unwrap().is_none());
  }

  #[test]
  fn delete_removes_directory_objects() {
    let temp = TempDir::new().unwrap();
    let repo = open(&temp);
    let a = path("a");
    let object = a.to_absolute(repo.store_dir());
    fs::create_dir_all(object.join("bin")).unwrap();
    fs::write(object.join("bin").join("a"), "#!/bin/sh").unwrap();
    repo.insert(PathInfo::new(a.clone(), 9)).unwrap();

    repo.delete(&a).unwrap();
    assert!(!object.exists());
  }

  #[test]
  fn substitutable_checks_narinfo_files() {
    let temp = TempDir::new().unwrap();
    let repo = open(&temp);
    let a = path("a");
    let b = path("b");
    let cache = temp.path().join("cache");
    fs::create_dir_all(&cache).unwrap();
    fs::write(cache.join(format!("{}.narinfo", a.hash_part())), "StorePath: a").unwrap();

    let found = repo.substitutable(&BTreeSet::from([a.clone(), b])).unwrap();
    assert_eq!(found, BTreeSet::from([a]));
  }
}
