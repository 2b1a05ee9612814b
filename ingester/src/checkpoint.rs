//! Durable per-intake-file checkpoint store.
//!
//! One JSON file per source at `<dir>/<stem>_checkpoint.json`, rewritten
//! atomically while the checkpoint's own `.lock` is held, so concurrent
//! saves for the same source serialize. A load observes either the most
//! recent committed state or nothing.

use data_types::{CheckpointStatus, IngestCheckpoint};
use file_util::{atomic_write, FileLock};
use observability_deps::tracing::warn;
use snafu::{ResultExt, Snafu};
use std::path::{Path, PathBuf};

/// Errors for the checkpoint store.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Cannot read checkpoint {}: {}", path, source))]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Cannot lock checkpoint {}: {}", path, source))]
    Lock {
        path: String,
        source: file_util::lock::Error,
    },

    #[snafu(display("Cannot persist checkpoint {}: {}", path, source))]
    Persist {
        path: String,
        source: file_util::atomic::Error,
    },

    #[snafu(display("Cannot delete checkpoint {}: {}", path, source))]
    Delete {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Cannot list checkpoint directory {}: {}", path, source))]
    ListDir {
        path: String,
        source: std::io::Error,
    },
}

/// Result with a checkpoint-store [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Store of ingest checkpoints under one directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Bind the store to `dir` (created on first save).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The checkpoint file path for an intake source.
    pub fn checkpoint_path(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        self.dir.join(format!("{stem}_checkpoint.json"))
    }

    /// Load the committed checkpoint for `source`.
    ///
    /// A missing file is `None`; so is a corrupt one, since restarting from
    /// the beginning beats wedging ingestion on an unreadable cursor.
    pub fn load(&self, source: &Path) -> Result<Option<IngestCheckpoint>> {
        let path = self.checkpoint_path(source);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).context(ReadSnafu {
                    path: path.display().to_string(),
                })
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                warn!(path=%path.display(), error=%e, "corrupt checkpoint treated as absent");
                Ok(None)
            }
        }
    }

    /// Persist `checkpoint` atomically under its lock.
    pub fn save(&self, checkpoint: &IngestCheckpoint) -> Result<()> {
        let path = self.checkpoint_path(Path::new(&checkpoint.source_file));
        let _lock = self.lock(&path)?;

        let json = serde_json::to_vec_pretty(checkpoint).expect("checkpoint serializes");
        atomic_write(&path, &json).context(PersistSnafu {
            path: path.display().to_string(),
        })
    }

    /// Mark the checkpoint for `source` completed, creating it if absent.
    pub fn mark_completed(&self, source: &Path) -> Result<()> {
        let mut checkpoint = self
            .load(source)?
            .unwrap_or_else(|| IngestCheckpoint::new(source.display().to_string()));
        checkpoint.mark_completed();
        self.save(&checkpoint)
    }

    /// Mark the checkpoint for `source` failed with `error`.
    pub fn mark_failed(&self, source: &Path, error: &str) -> Result<()> {
        let mut checkpoint = self
            .load(source)?
            .unwrap_or_else(|| IngestCheckpoint::new(source.display().to_string()));
        checkpoint.mark_failed(error);
        self.save(&checkpoint)
    }

    /// The lifecycle status of `source`; `None` when ingestion never
    /// started (or the checkpoint is unreadable).
    pub fn status(&self, source: &Path) -> Result<Option<CheckpointStatus>> {
        Ok(self.load(source)?.map(|c| c.status))
    }

    /// Remove the checkpoint for `source`, if present.
    pub fn delete(&self, source: &Path) -> Result<()> {
        let path = self.checkpoint_path(source);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(DeleteSnafu {
                path: path.display().to_string(),
            }),
        }
    }

    /// All readable checkpoints in the store, for diagnostics. Corrupt
    /// files are skipped.
    pub fn list(&self) -> Result<Vec<IngestCheckpoint>> {
        if !self.dir.is_dir() {
            return Ok(vec![]);
        }

        let mut checkpoints: Vec<IngestCheckpoint> = Vec::new();
        let entries = std::fs::read_dir(&self.dir).context(ListDirSnafu {
            path: self.dir.display().to_string(),
        })?;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_checkpoint = path
                .file_name()
                .map(|n| n.to_string_lossy().ends_with("_checkpoint.json"))
                .unwrap_or(false);
            if !is_checkpoint {
                continue;
            }
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            match serde_json::from_slice(&bytes) {
                Ok(checkpoint) => checkpoints.push(checkpoint),
                Err(e) => warn!(path=%path.display(), error=%e, "skipping corrupt checkpoint"),
            }
        }

        checkpoints.sort_by(|a, b| a.source_file.cmp(&b.source_file));
        Ok(checkpoints)
    }

    fn lock(&self, checkpoint_path: &Path) -> Result<FileLock> {
        let mut lock_path = checkpoint_path.as_os_str().to_owned();
        lock_path.push(".lock");
        FileLock::acquire(Path::new(&lock_path)).context(LockSnafu {
            path: checkpoint_path.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::CheckpointStatus;

    #[test]
    fn load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoints"));
        assert_eq!(store.load(Path::new("/intake/2026-01-23.jsonl")).unwrap(), None);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoints"));

        let mut checkpoint = IngestCheckpoint::new("/intake/2026-01-23.jsonl");
        checkpoint.last_processed_line = 10;
        checkpoint.last_processed_record_id = "m10".into();
        store.save(&checkpoint).unwrap();

        let loaded = store
            .load(Path::new("/intake/2026-01-23.jsonl"))
            .unwrap()
            .unwrap();
        assert_eq!(loaded, checkpoint);

        // The file name derives from the intake stem.
        assert!(dir
            .path()
            .join("checkpoints/2026-01-23_checkpoint.json")
            .exists());
    }

    #[test]
    fn corrupt_checkpoint_loads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        std::fs::write(dir.path().join("bad_checkpoint.json"), "{{{").unwrap();

        assert_eq!(store.load(Path::new("bad.jsonl")).unwrap(), None);
    }

    #[test]
    fn mark_completed_and_failed_create_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let source = Path::new("/intake/2026-01-23.jsonl");

        store.mark_completed(source).unwrap();
        let loaded = store.load(source).unwrap().unwrap();
        assert_eq!(loaded.status, CheckpointStatus::Completed);

        store.mark_failed(source, "disk full").unwrap();
        let loaded = store.load(source).unwrap().unwrap();
        assert_eq!(loaded.status, CheckpointStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("disk full"));
    }

    #[test]
    fn list_skips_corrupt_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        store
            .save(&IngestCheckpoint::new("/intake/a.jsonl"))
            .unwrap();
        store
            .save(&IngestCheckpoint::new("/intake/b.jsonl"))
            .unwrap();
        std::fs::write(dir.path().join("c_checkpoint.json"), "nope").unwrap();

        let all = store.list().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].source_file, "/intake/a.jsonl");
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let source = Path::new("/intake/a.jsonl");

        store.save(&IngestCheckpoint::new("/intake/a.jsonl")).unwrap();
        store.delete(source).unwrap();
        assert_eq!(store.load(source).unwrap(), None);
        store.delete(source).unwrap();
    }
}
