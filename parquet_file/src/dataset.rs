//! Walking the partitioned dataset layout.

use data_types::PartitionKey;
use snafu::{ResultExt, Snafu};
use std::path::{Path, PathBuf};

/// Errors while walking the dataset tree.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Dataset root not found: {}", path))]
    RootNotFound { path: String },

    #[snafu(display("Cannot list {}: {}", path, source))]
    ListDir {
        path: String,
        source: std::io::Error,
    },
}

/// Result with a dataset [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One materialized date partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDir {
    /// The partition's date key.
    pub key: PartitionKey,
    /// Absolute directory path.
    pub path: PathBuf,
}

/// Enumerate every `year=*/month=*/day=*` partition directory under `root`,
/// in chronological order. Directories that do not match the layout are
/// ignored.
pub fn scan_partition_dirs(root: &Path) -> Result<Vec<PartitionDir>> {
    if !root.is_dir() {
        return RootNotFoundSnafu {
            path: root.display().to_string(),
        }
        .fail();
    }

    let mut partitions = Vec::new();
    for year_dir in sorted_dirs(root)? {
        for month_dir in sorted_dirs(&year_dir)? {
            for day_dir in sorted_dirs(&month_dir)? {
                let key = PartitionKey::from_dir_names(
                    &name_of(&year_dir),
                    &name_of(&month_dir),
                    &name_of(&day_dir),
                );
                if let Some(key) = key {
                    partitions.push(PartitionDir { key, path: day_dir });
                }
            }
        }
    }

    partitions.sort_by_key(|p| p.key);
    Ok(partitions)
}

/// The parquet files of one partition directory, in part-number order.
///
/// `part-10` sorts after `part-2`; non-`part-N` names (e.g. `data.parquet`)
/// come first in lexical order. A missing directory lists as empty.
pub fn list_parquet_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(vec![]);
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .context(ListDirSnafu {
            path: dir.display().to_string(),
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|e| e == "parquet") && path.is_file())
        .collect();

    files.sort_by_key(|path| {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        (part_number(&stem), stem)
    });
    Ok(files)
}

/// Every parquet file under `root`, partitions in chronological order and
/// files in part order within each partition.
pub fn walk_parquet_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for partition in scan_partition_dirs(root)? {
        files.extend(list_parquet_files(&partition.path)?);
    }
    Ok(files)
}

/// The append-create target for the next batch written to `dir`:
/// `part-N.parquet` where `N` is the number of `part-*` files already
/// present. Never points at an existing file.
pub fn next_part_path(dir: &Path) -> Result<PathBuf> {
    let existing = list_parquet_files(dir)?
        .iter()
        .filter(|path| {
            path.file_stem()
                .map(|s| part_number(&s.to_string_lossy()).is_some())
                .unwrap_or(false)
        })
        .count();

    let mut n = existing;
    loop {
        let candidate = dir.join(format!("part-{n}.parquet"));
        if !candidate.exists() {
            return Ok(candidate);
        }
        n += 1;
    }
}

fn part_number(stem: &str) -> Option<u64> {
    stem.strip_prefix("part-")?.parse().ok()
}

fn sorted_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .context(ListDirSnafu {
            path: dir.display().to_string(),
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
