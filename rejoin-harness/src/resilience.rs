//! Resilience staging directory management.
//!
//! Workers persist recovery checkpoints under a shared staging directory.
//! The harness never looks inside it: it creates it empty before a scenario
//! and removes it afterwards, on every exit path.

use std::path::{Path, PathBuf};

use crate::error::HarnessError;

/// Owns a resilience staging directory for the lifetime of one scenario.
///
/// Call [`ResiliencePath::cleanup`] explicitly to observe removal errors. If
/// it is never called (early return, panic), `Drop` removes the directory and
/// logs any failure.
#[derive(Debug)]
pub struct ResiliencePath {
    path: PathBuf,
    cleaned: bool,
}

impl ResiliencePath {
    /// Create a clean, empty staging directory at `path`, removing any stale
    /// contents left by an earlier run.
    pub fn setup(path: impl Into<PathBuf>) -> Result<Self, HarnessError> {
        let path = path.into();
        remove_dir_if_present(&path)?;
        std::fs::create_dir_all(&path)?;
        tracing::debug!("Resilience staging ready at {}", path.display());
        Ok(Self {
            path,
            cleaned: false,
        })
    }

    /// Create a staging directory with a unique name under the system temp dir.
    pub fn unique() -> Result<Self, HarnessError> {
        let name = format!("rejoin-res-{}", uuid::Uuid::new_v4().as_simple());
        Self::setup(std::env::temp_dir().join(name))
    }

    /// Staging directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recursively remove the staging directory. Idempotent.
    pub fn cleanup(&mut self) -> Result<(), HarnessError> {
        if self.cleaned {
            return Ok(());
        }
        self.cleaned = true;
        remove_dir_if_present(&self.path)?;
        tracing::debug!("Resilience staging removed at {}", self.path.display());
        Ok(())
    }
}

impl Drop for ResiliencePath {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            tracing::warn!("{}", e);
        }
    }
}

fn remove_dir_if_present(path: &Path) -> Result<(), HarnessError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(HarnessError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[test]
    fn setup_creates_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = ResiliencePath::setup(tmp.path().join("res-data")).unwrap();
        assert!(staging.path().is_dir());
        assert!(is_empty_dir(staging.path()));
    }

    #[test]
    fn setup_removes_stale_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("res-data");
        std::fs::create_dir_all(path.join("nested")).unwrap();
        std::fs::write(path.join("initializer.evlog"), b"stale").unwrap();

        let staging = ResiliencePath::setup(&path).unwrap();
        assert!(is_empty_dir(staging.path()));
    }

    #[test]
    fn cleanup_removes_directory_and_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut staging = ResiliencePath::setup(tmp.path().join("res-data")).unwrap();
        std::fs::write(staging.path().join("worker1.state"), b"[2]").unwrap();
        let path = staging.path().to_path_buf();

        staging.cleanup().unwrap();
        assert!(!path.exists());
        staging.cleanup().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn drop_removes_directory_on_failure_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("res-data");

        let result = std::panic::catch_unwind(|| {
            let staging = ResiliencePath::setup(&path).unwrap();
            std::fs::write(staging.path().join("checkpoint"), b"x").unwrap();
            panic!("scenario failed");
        });

        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn cleanup_tolerates_directory_already_gone() {
        let tmp = tempfile::tempdir().unwrap();
        let mut staging = ResiliencePath::setup(tmp.path().join("res-data")).unwrap();
        std::fs::remove_dir_all(staging.path()).unwrap();
        staging.cleanup().unwrap();
    }

    #[test]
    fn unique_paths_differ() {
        let a = ResiliencePath::unique().unwrap();
        let b = ResiliencePath::unique().unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().is_dir());
    }
}
