//! Module-version discovery in an unpacked tree
//!
//! The root holds one directory per dump. Below each dump root, a directory
//! whose entries are all regular files is a leaf: its name is the version and
//! its parent path (relative to the dump root) is the module path. An empty
//! directory is a leaf too, so it surfaces as an incomplete module on load.
//! Any directory with a subdirectory is an intermediate path segment.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("{path} is neither a directory nor a regular file")]
    UnexpectedEntry { path: PathBuf },

    #[error("{path} has no module path above it")]
    MissingModulePath { path: PathBuf },

    #[error("{path} has a non UTF-8 name")]
    NonUtf8Name { path: PathBuf },

    #[error("module {module} found twice: {first} and {second}")]
    DuplicateModule {
        module: String,
        first: PathBuf,
        second: PathBuf,
    },
}

/// What to do when two leaves resolve to the same module path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the leaf discovered last (sorted traversal) and record a warning
    #[default]
    LastWins,
    /// Fail the scan
    Reject,
}

/// One loadable module version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleUnit {
    pub module: String,
    pub version: String,
    pub dir: PathBuf,
}

/// A module path that resolved to more than one leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateModule {
    pub previous: ModuleUnit,
    pub replacement: ModuleUnit,
}

#[derive(Debug, Default)]
pub struct Discovery {
    /// Sorted by module path (one version per path)
    pub units: Vec<ModuleUnit>,
    pub duplicates: Vec<DuplicateModule>,
}

/// Discover every module-version unit below `root`
pub fn scan_dumps(root: &Path, policy: DuplicatePolicy) -> Result<Discovery, ScanError> {
    let mut found: BTreeMap<String, ModuleUnit> = BTreeMap::new();
    let mut duplicates = Vec::new();

    for (dump_root, kind) in sorted_entries(root)? {
        if !kind.is_dir() {
            return Err(ScanError::NotADirectory { path: dump_root });
        }

        let mut leaves = Vec::new();
        collect_leaves(&dump_root, &dump_root, &mut leaves)?;
        debug!(dump = %dump_root.display(), leaves = leaves.len(), "Scanned dump");

        for unit in leaves {
            match found.entry(unit.module.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(unit);
                }
                Entry::Occupied(mut slot) => match policy {
                    DuplicatePolicy::Reject => {
                        return Err(ScanError::DuplicateModule {
                            module: unit.module,
                            first: slot.get().dir.clone(),
                            second: unit.dir,
                        });
                    }
                    DuplicatePolicy::LastWins => {
                        let previous = slot.insert(unit.clone());
                        warn!(
                            module = %unit.module,
                            dropped = %previous.version,
                            kept = %unit.version,
                            "Module found more than once, keeping the last one"
                        );
                        duplicates.push(DuplicateModule {
                            previous,
                            replacement: unit,
                        });
                    }
                },
            }
        }
    }

    Ok(Discovery {
        units: found.into_values().collect(),
        duplicates,
    })
}

fn collect_leaves(dump_root: &Path, dir: &Path, out: &mut Vec<ModuleUnit>) -> Result<(), ScanError> {
    let mut subdirs = Vec::new();
    let mut files = 0usize;

    for (path, kind) in sorted_entries(dir)? {
        if kind.is_dir() {
            subdirs.push(path);
        } else if kind.is_file() {
            files += 1;
        } else {
            return Err(ScanError::UnexpectedEntry { path });
        }
    }

    if subdirs.is_empty() {
        // a dump where every module failed
        if files == 0 && dir == dump_root {
            debug!(dir = %dir.display(), "Skipping empty dump");
            return Ok(());
        }
        out.push(leaf_unit(dump_root, dir)?);
        return Ok(());
    }

    if files > 0 {
        warn!(dir = %dir.display(), files, "Ignoring files next to subdirectories");
    }
    for subdir in subdirs {
        collect_leaves(dump_root, &subdir, out)?;
    }
    Ok(())
}

fn leaf_unit(dump_root: &Path, leaf: &Path) -> Result<ModuleUnit, ScanError> {
    let missing_module = || ScanError::MissingModulePath {
        path: leaf.to_path_buf(),
    };
    let non_utf8 = || ScanError::NonUtf8Name {
        path: leaf.to_path_buf(),
    };

    let version = leaf
        .file_name()
        .ok_or_else(missing_module)?
        .to_str()
        .ok_or_else(non_utf8)?
        .to_string();

    let relative = leaf
        .parent()
        .and_then(|parent| parent.strip_prefix(dump_root).ok())
        .ok_or_else(missing_module)?;

    let segments = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()
        .ok_or_else(non_utf8)?;

    if segments.is_empty() {
        return Err(missing_module());
    }

    Ok(ModuleUnit {
        module: segments.join("/"),
        version,
        dir: leaf.to_path_buf(),
    })
}

fn sorted_entries(dir: &Path) -> Result<Vec<(PathBuf, fs::FileType)>, ScanError> {
    let io_err = |source| ScanError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| {
            let entry = entry?;
            Ok((entry.path(), entry.file_type()?))
        })
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(io_err)?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}
