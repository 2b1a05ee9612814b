//! Advisory exclusive file lock with a polled acquisition timeout.

use fs2::FileExt;
use observability_deps::tracing::warn;
use snafu::{ResultExt, Snafu};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Default acquisition timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between non-blocking acquisition attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors for [`FileLock`].
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Cannot create lock file directory {}: {}", path, source))]
    CreateParent {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Cannot open lock file {}: {}", path, source))]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display(
        "Failed to acquire file lock for {} within {:?}",
        path,
        timeout
    ))]
    Timeout { path: String, timeout: Duration },
}

/// Result with a lock [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An acquired exclusive advisory lock on a path.
///
/// The lock is OS-backed (flock on POSIX, `LockFileEx` on Windows) and held
/// until the guard is dropped. Release is best-effort: a failing unlock is
/// logged and swallowed so teardown can never deadlock.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: Option<File>,
}

impl FileLock {
    /// Acquire the lock on `path` with default timeout and poll interval.
    pub fn acquire(path: &Path) -> Result<Self> {
        Self::acquire_with(path, DEFAULT_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }

    /// Acquire the lock on `path`, creating the file (and its parent
    /// directory) if absent.
    ///
    /// Acquisition polls a non-blocking exclusive lock every
    /// `poll_interval` until `timeout` elapses, then fails with
    /// [`Error::Timeout`].
    pub fn acquire_with(path: &Path, timeout: Duration, poll_interval: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(CreateParentSnafu {
                path: parent.display().to_string(),
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .context(OpenSnafu {
                path: path.display().to_string(),
            })?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self {
                        path: path.to_path_buf(),
                        file: Some(file),
                    })
                }
                Err(_) if Instant::now() < deadline => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    std::thread::sleep(poll_interval.min(remaining));
                }
                Err(_) => {
                    return TimeoutSnafu {
                        path: path.display().to_string(),
                        timeout,
                    }
                    .fail()
                }
            }
        }
    }

    /// The locked path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.unlock() {
                warn!(path=%self.path.display(), error=%e, "failed to release file lock");
            }
        }
    }
}
