//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::VaultError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout of a vault
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

    /// Device inventory
    pub fn inventory_file(&self) -> File {
        File::new(self.base_dir.join("devices.yaml"))
    }

    /// Classification rules
    pub fn rules_file(&self) -> File {
        File::new(self.base_dir.join("rules.yaml"))
    }

    /// Snapshot history, one subdirectory per device
    pub fn snapshots_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("snapshots"))
    }

    /// Archived deploy jobs
    pub fn jobs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("jobs"))
    }

    /// Running configs served by the directory transport
    pub fn configs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("configs"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), VaultError> {
        self.snapshots_dir().create().await?;
        self.jobs_dir().create().await?;
        self.configs_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let base_dir = std::env::var_os("CONFVAULT_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".confvault"))
            })
            .unwrap_or_else(|| PathBuf::from(".confvault"));

        Self::new(base_dir)
    }
}
