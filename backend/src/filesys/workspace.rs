//! Ephemeral workspaces
//!
//! A workspace is a uniquely named scratch directory that lives exactly as
//! long as the guard owning it. The directory is removed when the guard is
//! dropped, so every exit path of the owning operation (success, early
//! return through `?`, panic unwinding) cleans up after itself.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::errors::BackendError;

/// Scoped temporary directory
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Create `<root>/<prefix>-<uuid>`
    pub async fn create(root: &Path, prefix: &str) -> Result<Self, BackendError> {
        let path = root.join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        fs::create_dir_all(&path).await?;
        debug!("Created workspace {}", path.display());
        Ok(Self { path })
    }

    /// Get the workspace path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a path relative to the workspace root
    pub fn join(&self, relative: &str) -> PathBuf {
        let trimmed = relative.trim_matches('/');
        if trimmed.is_empty() || trimmed == "." {
            self.path.clone()
        } else {
            self.path.join(trimmed)
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed workspace {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove workspace {}: {}", self.path.display(), e),
        }
    }
}
