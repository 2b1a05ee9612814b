//! Write-then-rename atomic file replacement.

use snafu::{ResultExt, Snafu};
use std::io::Write;
use std::path::Path;

/// Errors for [`atomic_write`].
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Cannot create parent directory {}: {}", path, source))]
    CreateParent {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Cannot create temporary file next to {}: {}", path, source))]
    CreateTemp {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Cannot write temporary file for {}: {}", path, source))]
    WriteTemp {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Cannot sync temporary file for {}: {}", path, source))]
    SyncTemp {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Cannot rename temporary file onto {}: {}", path, source))]
    Commit {
        path: String,
        source: std::io::Error,
    },
}

/// Result with an atomic-write [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Replace `target` with `content`, atomically.
///
/// The content is written to a temporary sibling in the same directory
/// (guaranteeing the same filesystem), flushed, fsynced and then renamed
/// onto `target`. The rename is the commit point: after a crash at any
/// moment `target` holds either its previous content or the complete new
/// content, never a prefix. On error the temporary file is removed and
/// `target` is untouched.
pub fn atomic_write(target: &Path, content: &[u8]) -> Result<()> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).context(CreateParentSnafu {
        path: parent.display().to_string(),
    })?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let path = target.display().to_string();

    // NamedTempFile unlinks itself on drop, which covers every error exit
    // below the creation point.
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(parent)
        .context(CreateTempSnafu { path: path.clone() })?;

    tmp.write_all(content)
        .context(WriteTempSnafu { path: path.clone() })?;
    tmp.flush()
        .context(WriteTempSnafu { path: path.clone() })?;
    tmp.as_file()
        .sync_all()
        .context(SyncTempSnafu { path: path.clone() })?;

    tmp.persist(target)
        .map_err(|e| e.error)
        .context(CommitSnafu { path })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("data.json");

        atomic_write(&target, b"hello").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"hello");
    }

    #[test]
    fn replaces_existing_content_completely() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("data.json");
        std::fs::write(&target, "a much longer previous content").unwrap();

        atomic_write(&target, b"short").unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "short");
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/c/data.json");

        atomic_write(&target, b"nested").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"nested");
    }

    #[test]
    fn leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("data.json");

        atomic_write(&target, b"one").unwrap();
        atomic_write(&target, b"two").unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["data.json"]);
    }
}
