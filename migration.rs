//! Bulk re-encryption when an account switches algorithm.
//!
//! ```text
//! Idle -> KeyVerified -> Decrypting -> ReEncrypting -> MetadataCommitted
//!              \              \              \
//!               +--------------+--------------+--> Failed
//! ```
//!
//! Every encrypted file is first decrypted into the staging area. Only when
//! all of them are staged does re-encryption start, and new envelopes are
//! written next to the live objects under a pending name. Live objects are
//! replaced (by rename) only once every pending envelope exists, so a failure
//! before that point leaves the account exactly as it was. Staged plaintext
//! is removed as soon as its envelope is written and unconditionally when
//! the run ends.

use crate::algorithm::Algorithm;
use crate::envelope;
use crate::error::{Result, VaultError};
use crate::key_manager::{KeyManager, SecretKey};
use crate::locks::UserLocks;
use crate::metadata::{FileRecord, MetadataStore, UserId};
use crate::object_store::ObjectStore;
use crate::staging::StagingArea;
use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, warn};

const PENDING_SUFFIX: &str = ".migrating";

/// What to do when an encrypted file's object is missing during a migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingFilePolicy {
    /// Abort the whole migration (nothing is re-encrypted)
    #[default]
    Abort,
    /// Leave the file under its previous algorithm and carry on
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Idle,
    KeyVerified,
    Decrypting,
    ReEncrypting,
    MetadataCommitted,
    Failed,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationState::Idle => "idle",
            MigrationState::KeyVerified => "key verified",
            MigrationState::Decrypting => "decrypting",
            MigrationState::ReEncrypting => "re-encrypting",
            MigrationState::MetadataCommitted => "metadata committed",
            MigrationState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub user_id: UserId,
    pub from: Algorithm,
    pub to: Algorithm,
    /// Storage names now encrypted under `to`
    pub migrated: Vec<String>,
    /// Storage names left untouched because their object was missing
    pub skipped: Vec<String>,
    pub state: MigrationState,
}

enum Staged {
    Ready(FileRecord),
    Missing(FileRecord),
}

struct Run {
    user_id: UserId,
    from: Algorithm,
    to: Algorithm,
    state: MigrationState,
}

impl Run {
    fn enter(&mut self, next: MigrationState) {
        debug!(user_id = self.user_id, prev = %self.state, next = %next, "migration transition");
        self.state = next;
        info!(user_id = self.user_id, from = %self.from, to = %self.to, state = %next, "migration state");
    }

    fn report(&self, migrated: Vec<String>, skipped: Vec<String>) -> MigrationReport {
        MigrationReport {
            user_id: self.user_id,
            from: self.from,
            to: self.to,
            migrated,
            skipped,
            state: self.state,
        }
    }
}

fn pending_name(storage_name: &str) -> String {
    format!("{}{}", storage_name, PENDING_SUFFIX)
}

fn aborted(user_id: UserId, stage: &'static str, storage_name: &str, source: VaultError) -> VaultError {
    VaultError::MigrationAborted {
        user_id,
        stage,
        storage_name: storage_name.to_string(),
        source: Box::new(source),
    }
}

#[derive(Clone)]
pub struct Migrator {
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    keys: KeyManager,
    staging: StagingArea,
    locks: UserLocks,
    policy: MissingFilePolicy,
    workers: usize,
}

impl Migrator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        keys: KeyManager,
        staging: StagingArea,
        locks: UserLocks,
    ) -> Self {
        Self {
            metadata,
            objects,
            keys,
            staging,
            locks,
            policy: MissingFilePolicy::Abort,
            workers: 1,
        }
    }

    pub fn with_policy(mut self, policy: MissingFilePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Switches the account to `target`, re-encrypting every encrypted file.
    ///
    /// `key_hex` is only consulted when the account owns encrypted files.
    /// Holds the user's lock exclusively for the whole run.
    pub async fn switch_algorithm(
        &self,
        user_id: UserId,
        target: Algorithm,
        key_hex: Option<&str>,
    ) -> Result<MigrationReport> {
        let _guard = self.locks.exclusive(user_id).await;

        let from = self.metadata.get_user_algorithm(user_id).await?;
        let files = self.metadata.list_encrypted_files(user_id).await?;
        let mut run = Run {
            user_id,
            from,
            to: target,
            state: MigrationState::Idle,
        };

        if files.is_empty() {
            self.metadata.set_user_algorithm(user_id, target).await?;
            run.enter(MigrationState::MetadataCommitted);
            info!(user_id, %from, to = %target, "algorithm switched, no encrypted files");
            return Ok(run.report(Vec::new(), Vec::new()));
        }

        let key_hex = match key_hex {
            Some(k) if !k.is_empty() => k,
            _ => {
                warn!(user_id, "switch requested without a secret key");
                return Err(VaultError::authentication("secret key required to migrate encrypted files"));
            }
        };
        let key = self.keys.authorize(user_id, key_hex).await?;
        run.enter(MigrationState::KeyVerified);

        if from == target {
            info!(user_id, algorithm = %target, "algorithm already active, nothing to migrate");
            run.enter(MigrationState::Idle);
            return Ok(run.report(Vec::new(), Vec::new()));
        }

        let result = self.migrate(&mut run, &key, files).await;
        self.clear_staging(user_id).await;
        if result.is_err() && run.state != MigrationState::Failed {
            run.enter(MigrationState::Failed);
        }
        result
    }

    async fn migrate(
        &self,
        run: &mut Run,
        key: &SecretKey,
        files: Vec<FileRecord>,
    ) -> Result<MigrationReport> {
        let user_id = run.user_id;
        let from = run.from;

        run.enter(MigrationState::Decrypting);
        let staged: Vec<Staged> = stream::iter(files.into_iter())
            .map(|record| self.stage_file(user_id, record, key, from))
            .buffered(self.workers)
            .try_collect()
            .await?;

        let mut ready = Vec::new();
        let mut skipped = Vec::new();
        for item in staged {
            match item {
                Staged::Ready(record) => ready.push(record),
                Staged::Missing(record) => skipped.push(record.storage_name),
            }
        }

        run.enter(MigrationState::ReEncrypting);
        let to = run.to;
        let written: Result<Vec<String>> = stream::iter(ready.iter().cloned())
            .map(|record| async move { self.reencrypt_file(user_id, &record, key, to).await })
            .buffered(self.workers)
            .try_collect()
            .await;
        if let Err(e) = written {
            self.discard_pending(user_id, &ready).await;
            return Err(e);
        }

        let mut migrated = Vec::with_capacity(ready.len());
        for record in &ready {
            let pending = pending_name(&record.storage_name);
            if let Err(e) = self
                .objects
                .rename_object(user_id, &pending, &record.storage_name)
                .await
            {
                // Files already promoted are under the new algorithm; tag
                // them so they stay readable, then report the split state.
                let retag = match self.metadata.retag_files(user_id, &migrated, to).await {
                    Ok(()) => format!("re-tagged as {}", to),
                    Err(retag_err) => {
                        error!(
                            user_id,
                            promoted = ?migrated,
                            algorithm = %to,
                            error = %retag_err,
                            "could not re-tag promoted files, their records still name the previous algorithm"
                        );
                        format!("re-tagging them as {} failed: {}", to, retag_err)
                    }
                };
                self.discard_pending(user_id, &ready).await;
                let reason = format!(
                    "replacing '{}' failed after {} of {} files: {}; promoted [{}] {}",
                    record.storage_name,
                    migrated.len(),
                    ready.len(),
                    e,
                    migrated.join(", "),
                    retag
                );
                return Err(self.desync(run, reason));
            }
            migrated.push(record.storage_name.clone());
        }

        if let Err(e) = self.metadata.retag_files(user_id, &migrated, to).await {
            return Err(self.desync(run, format!("re-tagging files: {}", e)));
        }
        if let Err(e) = self.metadata.set_user_algorithm(user_id, to).await {
            return Err(self.desync(run, format!("updating account algorithm: {}", e)));
        }

        run.enter(MigrationState::MetadataCommitted);
        if !skipped.is_empty() {
            warn!(user_id, skipped = ?skipped, "migration skipped missing files, they remain under the previous algorithm");
        }
        info!(user_id, %from, %to, migrated = migrated.len(), "migration complete");
        Ok(run.report(migrated, skipped))
    }

    /// Decrypts one live object into the staging area.
    async fn stage_file(
        &self,
        user_id: UserId,
        record: FileRecord,
        key: &SecretKey,
        current: Algorithm,
    ) -> Result<Staged> {
        let name = record.storage_name.clone();
        let sealed = match self.objects.read_object(user_id, &name).await {
            Ok(sealed) => sealed,
            Err(e) if e.is_not_found() && self.policy == MissingFilePolicy::Skip => {
                warn!(user_id, storage_name = %name, "encrypted file missing, skipping");
                return Ok(Staged::Missing(record));
            }
            Err(e) => {
                error!(user_id, storage_name = %name, error = %e, "cannot read encrypted file");
                return Err(aborted(user_id, "decrypting", &name, e));
            }
        };

        let algorithm = record.algorithm.unwrap_or(current);
        let plaintext = envelope::decrypt(&sealed, key, algorithm)
            .map_err(|e| aborted(user_id, "decrypting", &name, e))?;
        self.staging
            .write(user_id, &name, &plaintext)
            .await
            .map_err(|e| aborted(user_id, "decrypting", &name, e))?;
        debug!(user_id, storage_name = %name, %algorithm, "file staged");
        Ok(Staged::Ready(record))
    }

    /// Encrypts one staged file under `target` into its pending object and
    /// drops the staged plaintext.
    async fn reencrypt_file(
        &self,
        user_id: UserId,
        record: &FileRecord,
        key: &SecretKey,
        target: Algorithm,
    ) -> Result<String> {
        let name = &record.storage_name;
        let result = async {
            let plaintext = self.staging.read(user_id, name).await?;
            let sealed = envelope::encrypt(&plaintext, key, target)?;
            self.objects
                .write_object(user_id, &pending_name(name), &sealed)
                .await
        }
        .await;

        if let Err(e) = self.staging.remove(user_id, name).await {
            warn!(user_id, storage_name = %name, error = %e, "could not remove staged plaintext");
        }

        match result {
            Ok(()) => {
                debug!(user_id, storage_name = %name, algorithm = %target, "file re-encrypted");
                Ok(name.clone())
            }
            Err(e) => {
                error!(user_id, storage_name = %name, error = %e, "re-encryption failed");
                Err(aborted(user_id, "re-encrypting", name, e))
            }
        }
    }

    async fn discard_pending(&self, user_id: UserId, records: &[FileRecord]) {
        for record in records {
            let pending = pending_name(&record.storage_name);
            match self.objects.delete_object(user_id, &pending).await {
                Ok(()) => debug!(user_id, storage_name = %pending, "pending envelope discarded"),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(user_id, storage_name = %pending, error = %e, "could not discard pending envelope"),
            }
        }
    }

    async fn clear_staging(&self, user_id: UserId) {
        let dir = self.staging.root().join(user_id.to_string());
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!(user_id, path = %dir.display(), error = %e, "could not clear staging directory"),
        }
    }

    fn desync(&self, run: &mut Run, reason: String) -> VaultError {
        error!(
            user_id = run.user_id,
            from = %run.from,
            to = %run.to,
            reason = %reason,
            "files re-encrypted but metadata commit failed; manual reconciliation required"
        );
        run.enter(MigrationState::Failed);
        VaultError::MetadataDesync {
            user_id: run.user_id,
            from: run.from,
            to: run.to,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_names() {
        let skip: MissingFilePolicy = serde_json::from_str(r#""skip""#).unwrap();
        assert_eq!(skip, MissingFilePolicy::Skip);
        assert_eq!(serde_json::to_string(&MissingFilePolicy::Abort).unwrap(), r#""abort""#);
        assert_eq!(MissingFilePolicy::default(), MissingFilePolicy::Abort);
    }

    #[test]
    fn test_pending_name_is_a_valid_sibling() {
        let name = pending_name("0b7e.txt");
        assert_eq!(name, "0b7e.txt.migrating");
        assert!(crate::util::validate_object_name(&name).is_ok());
    }
}
