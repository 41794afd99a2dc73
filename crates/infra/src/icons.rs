//! Icon asset storage.
//!
//! Only removal is needed here; uploads are handled by whatever serves the
//! assets.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::store::StoreError;

#[async_trait]
pub trait IconStorage: Send + Sync {
    /// Remove the asset behind an icon reference. Removing a missing asset is
    /// not an error.
    async fn remove(&self, icon: &str) -> Result<(), StoreError>;
}

/// Icons stored as plain files under one directory.
#[derive(Debug, Clone)]
pub struct FsIconStorage {
    root: PathBuf,
}

impl FsIconStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a reference to a file directly under the root. References that
    /// try to leave the root are refused.
    fn resolve(&self, icon: &str) -> Result<PathBuf, StoreError> {
        let name = Path::new(icon.trim())
            .file_name()
            .filter(|n| Path::new(n) == Path::new(icon.trim()))
            .ok_or_else(|| StoreError::Rejected(format!("icon reference '{icon}' is not a plain file name")))?;
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl IconStorage for FsIconStorage {
    async fn remove(&self, icon: &str) -> Result<(), StoreError> {
        let path = self.resolve(icon)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Unavailable(format!("removing {}: {}", path.display(), e))),
        }
    }
}

/// Records removals instead of touching the filesystem.
#[derive(Debug, Default)]
pub struct InMemoryIconStorage {
    removed: RwLock<Vec<String>>,
}

impl InMemoryIconStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.read().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl IconStorage for InMemoryIconStorage {
    async fn remove(&self, icon: &str) -> Result<(), StoreError> {
        self.removed
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?
            .push(icon.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn removes_file_and_tolerates_missing() {
        let dir = std::env::temp_dir().join(format!("modgate-icons-{}", uuid::Uuid::now_v7()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("jadwal.png"), b"png").await.unwrap();

        let storage = FsIconStorage::new(&dir);
        storage.remove("jadwal.png").await.unwrap();
        assert!(!dir.join("jadwal.png").exists());

        storage.remove("jadwal.png").await.unwrap();
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn refuses_paths_outside_root() {
        let storage = FsIconStorage::new("/tmp/unused");
        let err = storage.remove("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert!(storage.remove("a/b.png").await.is_err());
    }
}
