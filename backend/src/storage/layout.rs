//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::BackendError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout of the backend state
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the credential identity file path
    pub fn identity_file(&self) -> File {
        self.keys_dir().file("identity.txt")
    }

    /// Get the repository registry file
    pub fn repositories_file(&self) -> File {
        File::new(self.base_dir.join("repositories.json"))
    }

    /// Get the server registry file
    pub fn servers_file(&self) -> File {
        File::new(self.base_dir.join("servers.json"))
    }

    /// Get the application registry file
    pub fn applications_file(&self) -> File {
        File::new(self.base_dir.join("applications.json"))
    }

    /// Get the keys directory
    pub fn keys_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("keys"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), BackendError> {
        Dir::new(&self.base_dir).create().await?;
        self.keys_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/infraflow");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".infraflow");

        Self::new(base_dir)
    }
}
