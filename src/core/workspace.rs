//! Private scratch directory for intermediate artifacts.
//!
//! Each job gets its own uuid-suffixed directory so concurrent jobs never
//! collide, and the whole directory is removed when the job is done with it.

use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Failed to create work directory {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A per-job scratch directory, removed on `cleanup()` or drop.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    keep: bool,
}

impl WorkDir {
    /// Create a fresh scratch directory under the user cache directory,
    /// falling back to the system temp directory.
    pub fn create() -> Result<Self, WorkspaceError> {
        let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        let path = base.join(format!("wipeframe-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path).map_err(|source| WorkspaceError::Create {
            path: path.clone(),
            source,
        })?;
        log::debug!("Created work directory: {}", path.display());
        Ok(Self { path, keep: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path for the picture-only intermediate of this job.
    pub fn intermediate_path(&self) -> PathBuf {
        self.path.join("intermediate.mp4")
    }

    /// Remove the directory and everything in it. Safe to call more
    /// than once.
    pub fn cleanup(&self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                log::warn!("Failed to remove work directory {}: {e}", self.path.display());
            }
        }
    }

    /// Disarm the drop cleanup and hand the directory to the caller.
    /// Used when an artifact inside it must outlive the job.
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if !self.keep {
            self.cleanup();
        }
    }
}
