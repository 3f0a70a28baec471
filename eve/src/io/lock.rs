//! Advisory workspace lock held for the duration of a write or delete.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

const RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Lock file guard; the file is removed on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
}

impl WorkspaceLock {
    /// Create `path` exclusively, retrying until `timeout` elapses.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create lock dir {}", parent.display()))?;
        }
        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    // The pid is informational only.
                    let _ = writeln!(file, "{}", std::process::id());
                    debug!(path = %path.display(), "workspace lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(anyhow!(
                            "workspace lock {} held by another writer (waited {:?})",
                            path.display(),
                            timeout
                        ));
                    }
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("create lock {}", path.display()));
                }
            }
        }
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), err = %err, "failed to release workspace lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_times_out_until_release() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".eve/workspace.lock");

        let held = WorkspaceLock::acquire(&path, Duration::from_millis(10)).expect("first");
        assert!(WorkspaceLock::acquire(&path, Duration::from_millis(60)).is_err());

        drop(held);
        assert!(!path.exists());
        let _again = WorkspaceLock::acquire(&path, Duration::from_millis(10)).expect("again");
    }
}
