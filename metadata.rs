//! Account and file metadata.
//!
//! [`MetadataStore`] is the narrow interface the vault needs from whatever
//! database backs it. [`JsonMetadataStore`] keeps everything in one JSON
//! document, either purely in memory or persisted to a file.

use crate::algorithm::Algorithm;
use crate::error::{Result, VaultError};
use crate::util::write_atomic;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub type UserId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub name: String,
    /// Algorithm new encrypted uploads use
    pub algorithm: Algorithm,
    /// Argon2id PHC string of the hex key
    pub secret_hash: Option<String>,
    pub has_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub user_id: UserId,
    /// User-visible name, unique per user
    pub filename: String,
    /// Opaque object name in the object store, immutable
    pub storage_name: String,
    pub encrypted: bool,
    /// Algorithm of the stored envelope, `None` for plain files
    pub algorithm: Option<Algorithm>,
}

/// How a caller addresses one of its files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSelector {
    Filename(String),
    StorageName(String),
}

impl FileSelector {
    fn matches(&self, record: &FileRecord) -> bool {
        match self {
            FileSelector::Filename(name) => &record.filename == name,
            FileSelector::StorageName(name) => &record.storage_name == name,
        }
    }
}

impl std::fmt::Display for FileSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileSelector::Filename(name) => write!(f, "file '{}'", name),
            FileSelector::StorageName(name) => write!(f, "object '{}'", name),
        }
    }
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create_user(&self, name: &str, algorithm: Algorithm) -> Result<UserAccount>;

    async fn get_account(&self, user_id: UserId) -> Result<UserAccount>;

    /// Returns `(hash, has_key)`.
    async fn get_user_secret_hash(&self, user_id: UserId) -> Result<(Option<String>, bool)>;

    /// Stores the key hash and sets `has_key`. Fails with `Conflict` when a
    /// hash is already present.
    async fn set_user_secret_hash(&self, user_id: UserId, hash: &str) -> Result<()>;

    async fn get_user_algorithm(&self, user_id: UserId) -> Result<Algorithm>;

    async fn set_user_algorithm(&self, user_id: UserId, algorithm: Algorithm) -> Result<()>;

    async fn list_files(&self, user_id: UserId) -> Result<Vec<FileRecord>>;

    async fn list_encrypted_files(&self, user_id: UserId) -> Result<Vec<FileRecord>> {
        Ok(self
            .list_files(user_id)
            .await?
            .into_iter()
            .filter(|f| f.encrypted)
            .collect())
    }

    async fn find_file(&self, user_id: UserId, selector: &FileSelector) -> Result<Option<FileRecord>>;

    /// Fails with `Conflict` when the user already has a file with that name.
    async fn insert_file(&self, record: FileRecord) -> Result<()>;

    async fn delete_file(&self, user_id: UserId, storage_name: &str) -> Result<()>;

    /// Updates the algorithm tag of the named encrypted files.
    async fn retag_files(
        &self,
        user_id: UserId,
        storage_names: &[String],
        algorithm: Algorithm,
    ) -> Result<()>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct MetadataState {
    next_user_id: UserId,
    users: BTreeMap<UserId, UserAccount>,
    files: Vec<FileRecord>,
}

impl MetadataState {
    fn user_mut(&mut self, user_id: UserId) -> Result<&mut UserAccount> {
        self.users
            .get_mut(&user_id)
            .ok_or_else(|| VaultError::not_found(format!("user {}", user_id)))
    }

    fn user(&self, user_id: UserId) -> Result<&UserAccount> {
        self.users
            .get(&user_id)
            .ok_or_else(|| VaultError::not_found(format!("user {}", user_id)))
    }
}

pub struct JsonMetadataStore {
    path: Option<PathBuf>,
    state: RwLock<MetadataState>,
}

impl JsonMetadataStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(MetadataState::default()),
        }
    }

    /// Loads the document at `path`, starting empty if it does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if fs::try_exists(&path).await? {
            info!(path = %path.display(), "loading metadata");
            let content = fs::read_to_string(&path).await?;
            serde_json::from_str(&content)?
        } else {
            debug!(path = %path.display(), "metadata file absent, starting empty");
            MetadataState::default()
        };
        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
        })
    }

    /// Applies `f` to a copy of the state and swaps it in only once the
    /// copy has been persisted.
    async fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut MetadataState) -> Result<T>,
    {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        if let Some(path) = &self.path {
            let json = serde_json::to_vec_pretty(&next)?;
            write_atomic(path, &json).await?;
        }
        *guard = next;
        Ok(out)
    }
}

#[async_trait]
impl MetadataStore for JsonMetadataStore {
    async fn create_user(&self, name: &str, algorithm: Algorithm) -> Result<UserAccount> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(VaultError::configuration("user name cannot be empty"));
        }
        self.mutate(|state| {
            if state.users.values().any(|u| u.name == name) {
                return Err(VaultError::conflict(format!("user '{}' already exists", name)));
            }
            state.next_user_id += 1;
            let account = UserAccount {
                id: state.next_user_id,
                name,
                algorithm,
                secret_hash: None,
                has_key: false,
            };
            state.users.insert(account.id, account.clone());
            Ok(account)
        })
        .await
    }

    async fn get_account(&self, user_id: UserId) -> Result<UserAccount> {
        self.state.read().await.user(user_id).cloned()
    }

    async fn get_user_secret_hash(&self, user_id: UserId) -> Result<(Option<String>, bool)> {
        let state = self.state.read().await;
        let user = state.user(user_id)?;
        Ok((user.secret_hash.clone(), user.has_key))
    }

    async fn set_user_secret_hash(&self, user_id: UserId, hash: &str) -> Result<()> {
        self.mutate(|state| {
            let user = state.user_mut(user_id)?;
            if user.has_key || user.secret_hash.is_some() {
                return Err(VaultError::conflict(format!("user {} already has a secret key", user_id)));
            }
            user.secret_hash = Some(hash.to_string());
            user.has_key = true;
            Ok(())
        })
        .await
    }

    async fn get_user_algorithm(&self, user_id: UserId) -> Result<Algorithm> {
        Ok(self.state.read().await.user(user_id)?.algorithm)
    }

    async fn set_user_algorithm(&self, user_id: UserId, algorithm: Algorithm) -> Result<()> {
        self.mutate(|state| {
            state.user_mut(user_id)?.algorithm = algorithm;
            Ok(())
        })
        .await
    }

    async fn list_files(&self, user_id: UserId) -> Result<Vec<FileRecord>> {
        let state = self.state.read().await;
        state.user(user_id)?;
        let mut files: Vec<FileRecord> = state
            .files
            .iter()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }

    async fn find_file(&self, user_id: UserId, selector: &FileSelector) -> Result<Option<FileRecord>> {
        let state = self.state.read().await;
        Ok(state
            .files
            .iter()
            .find(|f| f.user_id == user_id && selector.matches(f))
            .cloned())
    }

    async fn insert_file(&self, record: FileRecord) -> Result<()> {
        self.mutate(|state| {
            state.user(record.user_id)?;
            if state
                .files
                .iter()
                .any(|f| f.user_id == record.user_id && f.filename == record.filename)
            {
                return Err(VaultError::conflict(format!(
                    "filename '{}' already in use",
                    record.filename
                )));
            }
            state.files.push(record);
            Ok(())
        })
        .await
    }

    async fn delete_file(&self, user_id: UserId, storage_name: &str) -> Result<()> {
        self.mutate(|state| {
            let before = state.files.len();
            state
                .files
                .retain(|f| !(f.user_id == user_id && f.storage_name == storage_name));
            if state.files.len() == before {
                return Err(VaultError::not_found(format!("object '{}'", storage_name)));
            }
            Ok(())
        })
        .await
    }

    async fn retag_files(
        &self,
        user_id: UserId,
        storage_names: &[String],
        algorithm: Algorithm,
    ) -> Result<()> {
        self.mutate(|state| {
            for file in state
                .files
                .iter_mut()
                .filter(|f| f.user_id == user_id && f.encrypted)
            {
                if storage_names.contains(&file.storage_name) {
                    file.algorithm = Some(algorithm);
                }
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(user_id: UserId, filename: &str, storage_name: &str, encrypted: bool) -> FileRecord {
        FileRecord {
            user_id,
            filename: filename.to_string(),
            storage_name: storage_name.to_string(),
            encrypted,
            algorithm: encrypted.then_some(Algorithm::Aes256),
        }
    }

    #[tokio::test]
    async fn test_secret_hash_is_set_once() {
        let store = JsonMetadataStore::in_memory();
        let user = store.create_user("alice", Algorithm::Aes256).await.unwrap();

        assert_eq!(store.get_user_secret_hash(user.id).await.unwrap(), (None, false));
        store.set_user_secret_hash(user.id, "hash-1").await.unwrap();

        let err = store.set_user_secret_hash(user.id, "hash-2").await.unwrap_err();
        assert!(matches!(err, VaultError::Conflict(_)));
        assert_eq!(
            store.get_user_secret_hash(user.id).await.unwrap(),
            (Some("hash-1".to_string()), true)
        );
    }

    #[tokio::test]
    async fn test_filenames_unique_per_user() {
        let store = JsonMetadataStore::in_memory();
        let alice = store.create_user("alice", Algorithm::Aes256).await.unwrap();
        let bob = store.create_user("bob", Algorithm::ChaCha20).await.unwrap();

        store.insert_file(record(alice.id, "a.txt", "1.txt", false)).await.unwrap();
        store.insert_file(record(bob.id, "a.txt", "2.txt", true)).await.unwrap();
        let err = store
            .insert_file(record(alice.id, "a.txt", "3.txt", true))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Conflict(_)));

        assert_eq!(store.list_files(alice.id).await.unwrap().len(), 1);
        assert!(store.list_encrypted_files(alice.id).await.unwrap().is_empty());
        assert_eq!(store.list_encrypted_files(bob.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let store = JsonMetadataStore::in_memory();
        assert!(store.get_account(42).await.unwrap_err().is_not_found());
        assert!(store.set_user_algorithm(42, Algorithm::ChaCha20).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_persists_and_reloads() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vault.json");

        let store = JsonMetadataStore::open(&path).await.unwrap();
        let user = store.create_user("alice", Algorithm::Aes256).await.unwrap();
        store.insert_file(record(user.id, "a.txt", "1.txt", true)).await.unwrap();
        store
            .retag_files(user.id, &["1.txt".to_string()], Algorithm::ChaCha20)
            .await
            .unwrap();
        store.set_user_algorithm(user.id, Algorithm::ChaCha20).await.unwrap();
        drop(store);

        let reopened = JsonMetadataStore::open(&path).await.unwrap();
        assert_eq!(reopened.get_user_algorithm(user.id).await.unwrap(), Algorithm::ChaCha20);
        let files = reopened.list_encrypted_files(user.id).await.unwrap();
        assert_eq!(files[0].algorithm, Some(Algorithm::ChaCha20));

        reopened.delete_file(user.id, "1.txt").await.unwrap();
        assert!(reopened.list_files(user.id).await.unwrap().is_empty());
    }
}
