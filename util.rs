//! Filesystem helpers shared by the stores.

use crate::error::{Result, VaultError};
use std::path::Path;
use tokio::fs;
use tracing::warn;

/// Writes `data` to `path` through a sibling temp file and a rename, so a
/// reader never observes a partially written file.
pub async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| VaultError::configuration(format!("path has no parent: {}", path.display())))?;
    let name = path
        .file_name()
        .ok_or_else(|| VaultError::configuration(format!("path has no filename: {}", path.display())))?
        .to_string_lossy()
        .into_owned();

    fs::create_dir_all(parent).await?;

    let tmp = parent.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()));
    if let Err(e) = fs::write(&tmp, data).await {
        fs::remove_file(&tmp).await.ok();
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        warn!(path = %path.display(), error = %e, "atomic rename failed");
        fs::remove_file(&tmp).await.ok();
        return Err(e.into());
    }
    Ok(())
}

/// Rejects names that could escape their container directory.
pub fn validate_object_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(VaultError::configuration(format!("invalid object name: {:?}", name)));
    }
    Ok(())
}
