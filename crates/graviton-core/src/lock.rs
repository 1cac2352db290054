//! Advisory lock on a deployment directory.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{GravitonError, Result};

pub const LOCK_FILE: &str = ".lock";

/// Held for the duration of a mutating lifecycle command. The lock file
/// is created exclusively and removed on drop.
#[derive(Debug)]
pub struct DeploymentLock {
    path: PathBuf,
}

impl DeploymentLock {
    pub fn acquire(dep_dir: &Path) -> Result<Self> {
        fs::create_dir_all(dep_dir).map_err(|e| GravitonError::persist(dep_dir, e))?;
        let path = dep_dir.join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                return Err(GravitonError::precondition(format!(
                    "the deployment at {} is locked by process {}; remove {} if that process is gone",
                    dep_dir.display(),
                    holder.trim(),
                    path.display()
                )));
            }
            Err(e) => return Err(GravitonError::persist(&path, e)),
        };
        writeln!(file, "{}", std::process::id()).map_err(|e| GravitonError::persist(&path, e))?;
        debug!(path = %path.display(), "deployment lock acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DeploymentLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "deployment lock released"),
            // The directory may already be gone after a destroy.
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to release lock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = DeploymentLock::acquire(dir.path()).unwrap();
        assert!(lock.path().exists());

        let err = DeploymentLock::acquire(dir.path()).unwrap_err();
        assert!(err.to_string().contains("locked"));

        drop(lock);
        assert!(!dir.path().join(LOCK_FILE).exists());
        DeploymentLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn release_tolerates_removed_directory() {
        let dir = tempfile::tempdir().unwrap();
        let dep = dir.path().join("demo");
        let lock = DeploymentLock::acquire(&dep).unwrap();
        fs::remove_dir_all(&dep).unwrap();
        drop(lock);
    }
}
