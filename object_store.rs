//! Object storage for file bodies, addressed by `(user_id, storage_name)`.

use crate::error::{Result, VaultError};
use crate::metadata::UserId;
use crate::util::{validate_object_name, write_atomic};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fails with `NotFound` if the object is absent.
    async fn read_object(&self, user_id: UserId, storage_name: &str) -> Result<Vec<u8>>;

    /// Creates the user's container if needed. Replaces an existing object
    /// atomically.
    async fn write_object(&self, user_id: UserId, storage_name: &str, data: &[u8]) -> Result<()>;

    /// Fails with `NotFound` if the object is absent.
    async fn delete_object(&self, user_id: UserId, storage_name: &str) -> Result<()>;

    async fn object_exists(&self, user_id: UserId, storage_name: &str) -> Result<bool>;

    /// Atomically replaces `to` with `from`.
    async fn rename_object(&self, user_id: UserId, from: &str, to: &str) -> Result<()>;
}

/// Stores objects as files under `<root>/<user_id>/<storage_name>`.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, user_id: UserId, storage_name: &str) -> Result<PathBuf> {
        validate_object_name(storage_name)?;
        Ok(self.root.join(user_id.to_string()).join(storage_name))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn read_object(&self, user_id: UserId, storage_name: &str) -> Result<Vec<u8>> {
        let path = self.path_of(user_id, storage_name)?;
        fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                VaultError::not_found(format!("object '{}' of user {}", storage_name, user_id))
            }
            _ => VaultError::storage(format!("reading {}: {}", path.display(), e)),
        })
    }

    async fn write_object(&self, user_id: UserId, storage_name: &str, data: &[u8]) -> Result<()> {
        let path = self.path_of(user_id, storage_name)?;
        write_atomic(&path, data).await?;
        debug!(user_id, storage_name, size = data.len(), "object written");
        Ok(())
    }

    async fn delete_object(&self, user_id: UserId, storage_name: &str) -> Result<()> {
        let path = self.path_of(user_id, storage_name)?;
        fs::remove_file(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                VaultError::not_found(format!("object '{}' of user {}", storage_name, user_id))
            }
            _ => VaultError::storage(format!("deleting {}: {}", path.display(), e)),
        })?;
        debug!(user_id, storage_name, "object deleted");
        Ok(())
    }

    async fn object_exists(&self, user_id: UserId, storage_name: &str) -> Result<bool> {
        let path = self.path_of(user_id, storage_name)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn rename_object(&self, user_id: UserId, from: &str, to: &str) -> Result<()> {
        let src = self.path_of(user_id, from)?;
        let dst = self.path_of(user_id, to)?;
        fs::rename(&src, &dst).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                VaultError::not_found(format!("object '{}' of user {}", from, user_id))
            }
            _ => VaultError::storage(format!("renaming {} -> {}: {}", src.display(), dst.display(), e)),
        })
    }
}
