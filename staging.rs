//! Staging area for plaintext that exists only while a migration runs,
//! plus a janitor that sweeps anything left behind.
//!
//! Layout: `<root>/<user_id>/<storage_name>`.

use crate::error::Result;
use crate::metadata::UserId;
use crate::util::{validate_object_name, write_atomic};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, user_id: UserId, storage_name: &str) -> Result<PathBuf> {
        validate_object_name(storage_name)?;
        Ok(self.root.join(user_id.to_string()).join(storage_name))
    }

    pub async fn write(&self, user_id: UserId, storage_name: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(user_id, storage_name)?;
        write_atomic(&path, data).await
    }

    pub async fn read(&self, user_id: UserId, storage_name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(user_id, storage_name)?;
        Ok(fs::read(&path).await?)
    }

    /// Removes a staged file; an already-absent file is not an error.
    pub async fn remove(&self, user_id: UserId, storage_name: &str) -> Result<()> {
        let path = self.path_for(user_id, storage_name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(user_id, storage_name, "staged plaintext removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of files currently staged for a user.
    pub async fn staged_count(&self, user_id: UserId) -> Result<usize> {
        let dir = self.root.join(user_id.to_string());
        if !fs::try_exists(&dir).await? {
            return Ok(0);
        }
        let mut count = 0;
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Deletes staged files whose modification time is older than `retention`.
/// Returns how many were removed.
pub async fn sweep_expired(root: &Path, retention: Duration) -> Result<usize> {
    if !fs::try_exists(root).await? {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut removed = 0;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                pending.push(path);
                continue;
            }

            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < retention {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "could not remove staged file"),
            }
        }
    }

    Ok(removed)
}

/// Runs [`sweep_expired`] every `interval` until the handle is aborted.
pub fn spawn_janitor(root: PathBuf, retention: Duration, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match sweep_expired(&root, retention).await {
                Ok(0) => debug!(root = %root.display(), "staging sweep found nothing"),
                Ok(n) => info!(root = %root.display(), removed = n, "staging sweep removed files"),
                Err(e) => warn!(root = %root.display(), error = %e, "staging sweep failed"),
            }
        }
    })
}
