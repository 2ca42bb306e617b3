//! High-level vault operations.
//!
//! This module provides [`Vault`], the interface a boundary layer (HTTP
//! handlers, the CLI) calls with an already-authenticated user id.
//!
//! ## Features
//!
//! - One-time secret key generation and verification
//! - Batch upload with a per-file outcome report
//! - Download and delete by user-visible filename or storage name
//! - Algorithm switching with bulk re-encryption
//!
//! Ordinary file operations hold the user's lock shared; key generation and
//! algorithm switches hold it exclusively.

use crate::algorithm::Algorithm;
use crate::config::Config;
use crate::error::{Result, VaultError};
use crate::file_crypto::FileCryptoService;
use crate::key_manager::KeyManager;
use crate::locks::UserLocks;
use crate::metadata::{FileRecord, FileSelector, JsonMetadataStore, MetadataStore, UserAccount, UserId};
use crate::migration::{MigrationReport, Migrator};
use crate::object_store::{FsObjectStore, ObjectStore};
use crate::staging::{self, StagingArea};
use crate::util::write_atomic;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

/// One file in an upload batch
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub content: Vec<u8>,
}

impl UploadFile {
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub encrypted: bool,
    pub key_hex: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { storage_name: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub filename: String,
    pub outcome: UploadOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub outcomes: Vec<FileOutcome>,
}

impl UploadReport {
    pub fn uploaded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, UploadOutcome::Uploaded { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.uploaded()
    }
}

/// Storage name for a new upload: a fresh UUID keeping the original extension.
fn new_storage_name(filename: &str) -> String {
    let id = uuid::Uuid::new_v4();
    match Path::new(filename).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{}.{}", id, ext),
        _ => id.to_string(),
    }
}

pub struct Vault {
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    keys: KeyManager,
    crypto: FileCryptoService,
    migrator: Migrator,
    locks: UserLocks,
    staging: StagingArea,
    staging_retention: Duration,
    default_algorithm: Algorithm,
}

impl Vault {
    pub fn new(
        cfg: &Config,
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        let locks = UserLocks::new();
        let staging = StagingArea::new(&cfg.staging_dir);
        let keys = KeyManager::new(metadata.clone(), cfg.argon2);
        let migrator = Migrator::new(
            metadata.clone(),
            objects.clone(),
            keys.clone(),
            staging.clone(),
            locks.clone(),
        )
        .with_policy(cfg.missing_file_policy)
        .with_workers(cfg.migration_workers);

        Self {
            metadata,
            objects,
            keys,
            crypto: FileCryptoService::new(),
            migrator,
            locks,
            staging,
            staging_retention: cfg.staging_retention(),
            default_algorithm: cfg.default_algorithm,
        }
    }

    /// Opens the JSON metadata document and filesystem object store named by `cfg`.
    pub async fn open(cfg: &Config) -> Result<Self> {
        let metadata = Arc::new(JsonMetadataStore::open(&cfg.metadata_path).await?);
        let objects = Arc::new(FsObjectStore::new(&cfg.storage_dir));
        Ok(Self::new(cfg, metadata, objects))
    }

    pub fn algorithms(&self) -> &'static [Algorithm] {
        &Algorithm::ALL
    }

    pub async fn add_user(&self, name: &str) -> Result<UserAccount> {
        let account = self.metadata.create_user(name, self.default_algorithm).await?;
        info!(user_id = account.id, algorithm = %account.algorithm, "user added");
        Ok(account)
    }

    pub async fn account(&self, user_id: UserId) -> Result<UserAccount> {
        self.metadata.get_account(user_id).await
    }

    /// Current algorithm and whether a secret key exists.
    pub async fn algorithm_status(&self, user_id: UserId) -> Result<(Algorithm, bool)> {
        let account = self.metadata.get_account(user_id).await?;
        Ok((account.algorithm, account.has_key))
    }

    pub async fn generate_key(&self, user_id: UserId) -> Result<Zeroizing<String>> {
        let _guard = self.locks.exclusive(user_id).await;
        self.keys.generate_key(user_id).await
    }

    pub async fn verify_key(&self, user_id: UserId, key_hex: &str) -> bool {
        self.keys.verify_key(user_id, key_hex).await
    }

    pub async fn list_files(&self, user_id: UserId) -> Result<Vec<FileRecord>> {
        self.metadata.list_files(user_id).await
    }

    /// Stores a batch of files. Each file succeeds or fails on its own; the
    /// call itself only fails when the user does not exist.
    pub async fn upload(
        &self,
        user_id: UserId,
        files: Vec<UploadFile>,
        options: UploadOptions,
    ) -> Result<UploadReport> {
        let _guard = self.locks.shared(user_id).await;
        let account = self.metadata.get_account(user_id).await?;

        // One key check for the whole batch; a rejection fails every file.
        let key_hex = if options.encrypted {
            match self.check_upload_key(&account, options.key_hex.as_deref()).await {
                Ok(key_hex) => Some(key_hex),
                Err(reason) => {
                    warn!(user_id, reason = %reason, "encrypted upload rejected");
                    let outcomes = files
                        .into_iter()
                        .map(|f| FileOutcome {
                            filename: f.filename,
                            outcome: UploadOutcome::Failed {
                                reason: reason.clone(),
                            },
                        })
                        .collect();
                    return Ok(UploadReport { outcomes });
                }
            }
        } else {
            None
        };

        let mut report = UploadReport::default();
        for file in files {
            let outcome = match self
                .upload_one(&account, &file, key_hex.as_deref())
                .await
            {
                Ok(storage_name) => UploadOutcome::Uploaded { storage_name },
                Err(e) => {
                    warn!(user_id, file = %file.filename, error = %e, "upload failed");
                    UploadOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            report.outcomes.push(FileOutcome {
                filename: file.filename,
                outcome,
            });
        }

        info!(user_id, uploaded = report.uploaded(), failed = report.failed(), "upload batch processed");
        Ok(report)
    }

    async fn check_upload_key<'a>(
        &self,
        account: &UserAccount,
        key_hex: Option<&'a str>,
    ) -> std::result::Result<&'a str, String> {
        if !account.has_key {
            return Err("you don't have a secret key".to_string());
        }
        let Some(k) = key_hex.filter(|k| !k.is_empty()) else {
            return Err("invalid secret key".to_string());
        };
        if self.keys.verify_key(account.id, k).await {
            Ok(k)
        } else {
            Err("invalid secret key".to_string())
        }
    }

    async fn upload_one(
        &self,
        account: &UserAccount,
        file: &UploadFile,
        key_hex: Option<&str>,
    ) -> Result<String> {
        let user_id = account.id;
        if file.filename.trim().is_empty() {
            return Err(VaultError::configuration("filename cannot be empty"));
        }
        let selector = FileSelector::Filename(file.filename.clone());
        if self.metadata.find_file(user_id, &selector).await?.is_some() {
            return Err(VaultError::conflict("filename already in use"));
        }

        let storage_name = new_storage_name(&file.filename);
        let (body, algorithm) = match key_hex {
            Some(key_hex) => (
                self.crypto.seal(&file.content, key_hex, account.algorithm)?,
                Some(account.algorithm),
            ),
            None => (file.content.clone(), None),
        };

        self.objects.write_object(user_id, &storage_name, &body).await?;

        let record = FileRecord {
            user_id,
            filename: file.filename.clone(),
            storage_name: storage_name.clone(),
            encrypted: algorithm.is_some(),
            algorithm,
        };
        if let Err(e) = self.metadata.insert_file(record).await {
            self.objects.delete_object(user_id, &storage_name).await.ok();
            return Err(e);
        }

        debug!(user_id, file = %file.filename, storage_name = %storage_name, encrypted = algorithm.is_some(), "file uploaded");
        Ok(storage_name)
    }

    /// Returns a file's plaintext. Encrypted files need the user's key.
    pub async fn download(
        &self,
        user_id: UserId,
        filename: &str,
        key_hex: Option<&str>,
    ) -> Result<Vec<u8>> {
        let _guard = self.locks.shared(user_id).await;
        let selector = FileSelector::Filename(filename.to_string());
        let record = self
            .metadata
            .find_file(user_id, &selector)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("file '{}'", filename)))?;

        let body = self.objects.read_object(user_id, &record.storage_name).await?;
        if !record.encrypted {
            return Ok(body);
        }

        let key_hex = match key_hex {
            Some(k) if !k.is_empty() => k,
            _ => return Err(VaultError::configuration("no secret key given for an encrypted file")),
        };
        if !self.keys.verify_key(user_id, key_hex).await {
            return Err(VaultError::authentication("invalid secret key"));
        }

        let algorithm = match record.algorithm {
            Some(algorithm) => algorithm,
            None => self.metadata.get_user_algorithm(user_id).await?,
        };
        match self.crypto.open(&body, key_hex, algorithm) {
            Ok(plaintext) => {
                info!(user_id, file = %filename, %algorithm, size = plaintext.len(), "file decrypted for download");
                Ok(plaintext)
            }
            Err(e) => {
                error!(user_id, file = %filename, error = %e, "download decryption failed");
                Err(e)
            }
        }
    }

    /// Downloads to `destination`, which only appears once complete.
    pub async fn download_to(
        &self,
        user_id: UserId,
        filename: &str,
        key_hex: Option<&str>,
        destination: &Path,
    ) -> Result<u64> {
        let data = self.download(user_id, filename, key_hex).await?;
        write_atomic(destination, &data).await?;
        Ok(data.len() as u64)
    }

    /// Deletes a file's record and object.
    pub async fn delete(&self, user_id: UserId, selector: FileSelector) -> Result<()> {
        let _guard = self.locks.shared(user_id).await;
        let record = self
            .metadata
            .find_file(user_id, &selector)
            .await?
            .ok_or_else(|| VaultError::not_found(selector.to_string()))?;

        if !self.objects.object_exists(user_id, &record.storage_name).await? {
            return Err(VaultError::not_found(selector.to_string()));
        }

        self.metadata.delete_file(user_id, &record.storage_name).await?;
        self.objects.delete_object(user_id, &record.storage_name).await?;
        info!(user_id, file = %record.filename, storage_name = %record.storage_name, "file deleted");
        Ok(())
    }

    /// Switches the account's algorithm, re-encrypting every encrypted file.
    pub async fn switch_algorithm(
        &self,
        user_id: UserId,
        target: Algorithm,
        key_hex: Option<&str>,
    ) -> Result<MigrationReport> {
        self.migrator.switch_algorithm(user_id, target, key_hex).await
    }

    /// Removes staged files older than the retention window, then forgets
    /// the locks of idle users.
    pub async fn sweep_staging(&self) -> Result<usize> {
        let removed = staging::sweep_expired(self.staging.root(), self.staging_retention).await?;
        let pruned = self.locks.prune();
        debug!(removed, pruned, "staging sweep finished");
        Ok(removed)
    }

    /// Plaintext files currently staged for a user; zero outside a running
    /// migration.
    pub async fn staged_files(&self, user_id: UserId) -> Result<usize> {
        self.staging.staged_count(user_id).await
    }

    /// Starts the background staging janitor.
    pub fn spawn_staging_janitor(&self, interval: Duration) -> JoinHandle<()> {
        staging::spawn_janitor(
            PathBuf::from(self.staging.root()),
            self.staging_retention,
            interval,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_name_keeps_extension() {
        let name = new_storage_name("report.final.pdf");
        assert!(name.ends_with(".pdf"));
        assert_eq!(name.len(), 36 + 4);

        let bare = new_storage_name("README");
        assert_eq!(bare.len(), 36);
        assert_ne!(new_storage_name("a.txt"), new_storage_name("a.txt"));
    }

    #[test]
    fn test_report_counts() {
        let report = UploadReport {
            outcomes: vec![
                FileOutcome {
                    filename: "a".into(),
                    outcome: UploadOutcome::Uploaded {
                        storage_name: "x".into(),
                    },
                },
                FileOutcome {
                    filename: "b".into(),
                    outcome: UploadOutcome::Failed {
                        reason: "nope".into(),
                    },
                },
            ],
        };
        assert_eq!(report.uploaded(), 1);
        assert_eq!(report.failed(), 1);
    }
}
