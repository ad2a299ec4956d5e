//! Filesystem adapter for ArtifactStore
//!
//! Artifacts are plain files below `root`. Publishing writes a `.partial`
//! sibling first and renames it over the final path, so a crash mid-write
//! can never leave a truncated binary that gate checks would mistake for a
//! finished build.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::{ArtifactKey, ArtifactStore};
use crate::{Result, StorageError};

/// Mode for published executables: rwx for owner, r-x for group and other
#[cfg(unix)]
const EXECUTABLE_MODE: u32 = 0o755;

pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partial_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".partial");
        PathBuf::from(name)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    fn locate(&self, key: &ArtifactKey) -> PathBuf {
        key.resolve(&self.root)
    }

    async fn exists(&self, key: &ArtifactKey) -> bool {
        tokio::fs::try_exists(self.locate(key))
            .await
            .unwrap_or(false)
    }

    async fn publish(&self, key: &ArtifactKey, data: &[u8]) -> Result<PathBuf> {
        let target = self.locate(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::io(format!("Failed to create {}", parent.display()), e)
            })?;
        }

        let partial = Self::partial_path(&target);
        tokio::fs::write(&partial, data)
            .await
            .map_err(|e| StorageError::io(format!("Failed to write {}", partial.display()), e))?;

        #[cfg(unix)]
        if key.kind().is_executable() {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&partial, std::fs::Permissions::from_mode(EXECUTABLE_MODE))
                .await
                .map_err(|e| {
                    StorageError::io(format!("Failed to chmod {}", partial.display()), e)
                })?;
        }

        tokio::fs::rename(&partial, &target).await.map_err(|e| {
            StorageError::io(format!("Failed to move artifact to {}", target.display()), e)
        })?;

        Ok(target)
    }
}
