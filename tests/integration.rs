use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use filevault::{
    config::Config,
    envelope,
    error::VaultError,
    file_crypto::FileCryptoService,
    key_manager::{HashParams, SecretKey},
    metadata::{FileRecord, FileSelector, JsonMetadataStore, MetadataStore, UserAccount, UserId},
    migration::{MigrationState, MissingFilePolicy},
    object_store::{FsObjectStore, ObjectStore},
    staging::StagingArea,
    vault::{UploadFile, UploadOptions, UploadOutcome, Vault},
    Algorithm,
};

/// Object store that fails the Nth pending-envelope write or the Nth
/// rename (1-based, 0 never fails)
struct FailingObjectStore {
    inner: FsObjectStore,
    fail_pending_write: usize,
    fail_rename: usize,
    pending_writes: AtomicUsize,
    renames: AtomicUsize,
}

impl FailingObjectStore {
    fn new(root: &str, fail_pending_write: usize, fail_rename: usize) -> Self {
        Self {
            inner: FsObjectStore::new(root),
            fail_pending_write,
            fail_rename,
            pending_writes: AtomicUsize::new(0),
            renames: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ObjectStore for FailingObjectStore {
    async fn read_object(&self, user_id: UserId, storage_name: &str) -> filevault::error::Result<Vec<u8>> {
        self.inner.read_object(user_id, storage_name).await
    }

    async fn write_object(
        &self,
        user_id: UserId,
        storage_name: &str,
        data: &[u8],
    ) -> filevault::error::Result<()> {
        if storage_name.ends_with(".migrating") {
            let n = self.pending_writes.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_pending_write {
                return Err(VaultError::storage("no space left on device"));
            }
        }
        self.inner.write_object(user_id, storage_name, data).await
    }

    async fn delete_object(&self, user_id: UserId, storage_name: &str) -> filevault::error::Result<()> {
        self.inner.delete_object(user_id, storage_name).await
    }

    async fn object_exists(&self, user_id: UserId, storage_name: &str) -> filevault::error::Result<bool> {
        self.inner.object_exists(user_id, storage_name).await
    }

    async fn rename_object(&self, user_id: UserId, from: &str, to: &str) -> filevault::error::Result<()> {
        let n = self.renames.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_rename {
            return Err(VaultError::storage("rename failed"));
        }
        self.inner.rename_object(user_id, from, to).await
    }
}

/// Metadata store whose algorithm update or re-tagging can be made to fail
struct FailingMetadataStore {
    inner: JsonMetadataStore,
    fail_set_algorithm: AtomicBool,
    fail_retag: AtomicBool,
}

impl FailingMetadataStore {
    fn new() -> Self {
        Self {
            inner: JsonMetadataStore::in_memory(),
            fail_set_algorithm: AtomicBool::new(false),
            fail_retag: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl MetadataStore for FailingMetadataStore {
    async fn create_user(&self, name: &str, algorithm: Algorithm) -> filevault::error::Result<UserAccount> {
        self.inner.create_user(name, algorithm).await
    }

    async fn get_account(&self, user_id: UserId) -> filevault::error::Result<UserAccount> {
        self.inner.get_account(user_id).await
    }

    async fn get_user_secret_hash(
        &self,
        user_id: UserId,
    ) -> filevault::error::Result<(Option<String>, bool)> {
        self.inner.get_user_secret_hash(user_id).await
    }

    async fn set_user_secret_hash(&self, user_id: UserId, hash: &str) -> filevault::error::Result<()> {
        self.inner.set_user_secret_hash(user_id, hash).await
    }

    async fn get_user_algorithm(&self, user_id: UserId) -> filevault::error::Result<Algorithm> {
        self.inner.get_user_algorithm(user_id).await
    }

    async fn set_user_algorithm(&self, user_id: UserId, algorithm: Algorithm) -> filevault::error::Result<()> {
        if self.fail_set_algorithm.load(Ordering::SeqCst) {
            return Err(VaultError::storage("database is locked"));
        }
        self.inner.set_user_algorithm(user_id, algorithm).await
    }

    async fn list_files(&self, user_id: UserId) -> filevault::error::Result<Vec<FileRecord>> {
        self.inner.list_files(user_id).await
    }

    async fn find_file(
        &self,
        user_id: UserId,
        selector: &FileSelector,
    ) -> filevault::error::Result<Option<FileRecord>> {
        self.inner.find_file(user_id, selector).await
    }

    async fn insert_file(&self, record: FileRecord) -> filevault::error::Result<()> {
        self.inner.insert_file(record).await
    }

    async fn delete_file(&self, user_id: UserId, storage_name: &str) -> filevault::error::Result<()> {
        self.inner.delete_file(user_id, storage_name).await
    }

    async fn retag_files(
        &self,
        user_id: UserId,
        storage_names: &[String],
        algorithm: Algorithm,
    ) -> filevault::error::Result<()> {
        if self.fail_retag.load(Ordering::SeqCst) {
            return Err(VaultError::storage("retag rejected"));
        }
        self.inner.retag_files(user_id, storage_names, algorithm).await
    }
}

/// Config rooted in a temp dir with cheap Argon2 parameters
fn test_config(tmp: &TempDir) -> Config {
    let root = tmp.path();
    let mut cfg = Config::new(
        root.join("uploads").to_string_lossy().to_string(),
        root.join("staging").to_string_lossy().to_string(),
        root.join("vault.json").to_string_lossy().to_string(),
    );
    cfg.argon2 = HashParams {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    };
    cfg
}

fn fs_vault(cfg: &Config) -> Vault {
    Vault::new(
        cfg,
        Arc::new(JsonMetadataStore::in_memory()),
        Arc::new(FsObjectStore::new(&cfg.storage_dir)),
    )
}

/// Adds a user with a fresh key and uploads `files` encrypted
async fn seed_user(vault: &Vault, files: &[(&str, &[u8])]) -> Result<(UserId, String)> {
    let account = vault.add_user("alice").await?;
    let key_hex = vault.generate_key(account.id).await?.as_str().to_owned();

    let batch = files
        .iter()
        .map(|(name, data)| UploadFile::new(*name, data.to_vec()))
        .collect();
    let report = vault
        .upload(
            account.id,
            batch,
            UploadOptions {
                encrypted: true,
                key_hex: Some(key_hex.clone()),
            },
        )
        .await?;
    assert_eq!(report.failed(), 0, "seed upload failed: {:?}", report);
    Ok((account.id, key_hex))
}

fn object_path(cfg: &Config, user_id: UserId, storage_name: &str) -> PathBuf {
    Path::new(&cfg.storage_dir)
        .join(user_id.to_string())
        .join(storage_name)
}

fn pending_objects(cfg: &Config, user_id: UserId) -> Result<Vec<String>> {
    let dir = Path::new(&cfg.storage_dir).join(user_id.to_string());
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().to_string();
        if name.ends_with(".migrating") {
            names.push(name);
        }
    }
    Ok(names)
}

async fn staged_count(cfg: &Config, user_id: UserId) -> Result<usize> {
    Ok(StagingArea::new(&cfg.staging_dir).staged_count(user_id).await?)
}

fn assert_send<T: Send>(_: &T) {}

const FILES: [(&str, &[u8]); 3] = [
    ("a.txt", b"first file"),
    ("b.pdf", b"second file with more bytes"),
    ("c", b""),
];

#[tokio::test]
async fn switch_reencrypts_every_file() -> Result<()> {
    let tmp = TempDir::new()?;
    let cfg = test_config(&tmp);
    let vault = fs_vault(&cfg);
    let (user, key_hex) = seed_user(&vault, &FILES).await?;

    let report = vault
        .switch_algorithm(user, Algorithm::ChaCha20, Some(&key_hex))
        .await?;
    assert_eq!(report.from, Algorithm::Aes256);
    assert_eq!(report.to, Algorithm::ChaCha20);
    assert_eq!(report.migrated.len(), 3);
    assert!(report.skipped.is_empty());
    assert_eq!(report.state, MigrationState::MetadataCommitted);

    assert_eq!(vault.account(user).await?.algorithm, Algorithm::ChaCha20);

    let key = SecretKey::from_hex(&key_hex)?;
    for record in vault.list_files(user).await? {
        assert_eq!(record.algorithm, Some(Algorithm::ChaCha20));
        let raw = std::fs::read(object_path(&cfg, user, &record.storage_name))?;
        assert!(envelope::decrypt(&raw, &key, Algorithm::Aes256).is_err());
        envelope::decrypt(&raw, &key, Algorithm::ChaCha20)?;
    }

    for (name, data) in FILES {
        assert_eq!(vault.download(user, name, Some(&key_hex)).await?, data);
    }

    assert_eq!(staged_count(&cfg, user).await?, 0);
    assert!(pending_objects(&cfg, user)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn write_failure_leaves_account_untouched() -> Result<()> {
    let tmp = TempDir::new()?;
    let cfg = test_config(&tmp);
    let objects = Arc::new(FailingObjectStore::new(&cfg.storage_dir, 2, 0));
    let vault = Vault::new(&cfg, Arc::new(JsonMetadataStore::in_memory()), objects);
    let (user, key_hex) = seed_user(&vault, &FILES).await?;

    let err = vault
        .switch_algorithm(user, Algorithm::ChaCha20, Some(&key_hex))
        .await
        .unwrap_err();
    match &err {
        VaultError::MigrationAborted { stage, .. } => assert_eq!(*stage, "re-encrypting"),
        other => panic!("expected MigrationAborted, got {:?}", other),
    }

    assert_eq!(vault.account(user).await?.algorithm, Algorithm::Aes256);

    // The first file's envelope was re-encrypted only under its pending
    // name, so the live object still opens as AES.
    let key = SecretKey::from_hex(&key_hex)?;
    let first = vault.list_files(user).await?.remove(0);
    assert_eq!(first.algorithm, Some(Algorithm::Aes256));
    let raw = std::fs::read(object_path(&cfg, user, &first.storage_name))?;
    assert_eq!(envelope::decrypt(&raw, &key, Algorithm::Aes256)?, b"first file");

    for (name, data) in FILES {
        assert_eq!(vault.download(user, name, Some(&key_hex)).await?, data);
    }

    assert_eq!(staged_count(&cfg, user).await?, 0);
    assert!(pending_objects(&cfg, user)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn wrong_or_missing_key_is_rejected() -> Result<()> {
    let tmp = TempDir::new()?;
    let cfg = test_config(&tmp);
    let vault = fs_vault(&cfg);
    let (user, _key_hex) = seed_user(&vault, &FILES).await?;

    let before: Vec<Vec<u8>> = vault
        .list_files(user)
        .await?
        .iter()
        .map(|r| std::fs::read(object_path(&cfg, user, &r.storage_name)))
        .collect::<std::io::Result<_>>()?;

    let other = SecretKey::generate().to_hex();
    let err = vault
        .switch_algorithm(user, Algorithm::ChaCha20, Some(other.as_str()))
        .await
        .unwrap_err();
    assert!(err.is_authentication());

    let err = vault
        .switch_algorithm(user, Algorithm::ChaCha20, None)
        .await
        .unwrap_err();
    assert!(err.is_authentication());

    let err = vault
        .switch_algorithm(user, Algorithm::ChaCha20, Some(""))
        .await
        .unwrap_err();
    assert!(err.is_authentication());

    let after: Vec<Vec<u8>> = vault
        .list_files(user)
        .await?
        .iter()
        .map(|r| std::fs::read(object_path(&cfg, user, &r.storage_name)))
        .collect::<std::io::Result<_>>()?;
    assert_eq!(before, after);
    assert_eq!(vault.account(user).await?.algorithm, Algorithm::Aes256);
    assert_eq!(staged_count(&cfg, user).await?, 0);
    Ok(())
}

#[tokio::test]
async fn switch_without_encrypted_files_needs_no_key() -> Result<()> {
    let tmp = TempDir::new()?;
    let cfg = test_config(&tmp);
    let vault = fs_vault(&cfg);
    let account = vault.add_user("bob").await?;

    let report = vault
        .upload(
            account.id,
            vec![UploadFile::new("plain.txt", b"not secret".to_vec())],
            UploadOptions::default(),
        )
        .await?;
    assert_eq!(report.uploaded(), 1);

    let report = vault
        .switch_algorithm(account.id, Algorithm::ChaCha20, None)
        .await?;
    assert!(report.migrated.is_empty());
    assert_eq!(
        vault.algorithm_status(account.id).await?,
        (Algorithm::ChaCha20, false)
    );
    assert_eq!(
        vault.download(account.id, "plain.txt", None).await?,
        b"not secret"
    );
    Ok(())
}

#[tokio::test]
async fn switch_to_current_algorithm_is_noop() -> Result<()> {
    let tmp = TempDir::new()?;
    let cfg = test_config(&tmp);
    let vault = fs_vault(&cfg);
    let (user, key_hex) = seed_user(&vault, &FILES).await?;

    let first = vault.list_files(user).await?.remove(0);
    let before = std::fs::read(object_path(&cfg, user, &first.storage_name))?;

    let report = vault
        .switch_algorithm(user, Algorithm::Aes256, Some(&key_hex))
        .await?;
    assert!(report.migrated.is_empty());
    assert_eq!(
        std::fs::read(object_path(&cfg, user, &first.storage_name))?,
        before
    );
    Ok(())
}

#[tokio::test]
async fn missing_object_aborts_by_default() -> Result<()> {
    let tmp = TempDir::new()?;
    let cfg = test_config(&tmp);
    let vault = fs_vault(&cfg);
    let (user, key_hex) = seed_user(&vault, &FILES).await?;

    let gone = vault.list_files(user).await?.remove(1);
    std::fs::remove_file(object_path(&cfg, user, &gone.storage_name))?;

    let err = vault
        .switch_algorithm(user, Algorithm::ChaCha20, Some(&key_hex))
        .await
        .unwrap_err();
    match err {
        VaultError::MigrationAborted {
            storage_name,
            source,
            ..
        } => {
            assert_eq!(storage_name, gone.storage_name);
            assert!(source.is_not_found());
        }
        other => panic!("expected MigrationAborted, got {:?}", other),
    }

    assert_eq!(vault.account(user).await?.algorithm, Algorithm::Aes256);
    assert_eq!(vault.download(user, "a.txt", Some(&key_hex)).await?, b"first file");
    assert_eq!(staged_count(&cfg, user).await?, 0);
    Ok(())
}

#[tokio::test]
async fn missing_object_skipped_when_configured() -> Result<()> {
    let tmp = TempDir::new()?;
    let mut cfg = test_config(&tmp);
    cfg.missing_file_policy = MissingFilePolicy::Skip;
    let vault = fs_vault(&cfg);
    let (user, key_hex) = seed_user(&vault, &FILES).await?;

    let gone = vault.list_files(user).await?.remove(1);
    std::fs::remove_file(object_path(&cfg, user, &gone.storage_name))?;

    let report = vault
        .switch_algorithm(user, Algorithm::ChaCha20, Some(&key_hex))
        .await?;
    assert_eq!(report.skipped, vec![gone.storage_name.clone()]);
    assert_eq!(report.migrated.len(), 2);

    let files = vault.list_files(user).await?;
    let skipped = files
        .iter()
        .find(|f| f.storage_name == gone.storage_name)
        .unwrap();
    assert_eq!(skipped.algorithm, Some(Algorithm::Aes256));

    assert_eq!(vault.download(user, "a.txt", Some(&key_hex)).await?, b"first file");
    assert_eq!(vault.download(user, "c", Some(&key_hex)).await?, b"");
    Ok(())
}

#[tokio::test]
async fn failed_commit_reports_desync() -> Result<()> {
    let tmp = TempDir::new()?;
    let cfg = test_config(&tmp);
    let metadata = Arc::new(FailingMetadataStore::new());
    let vault = Vault::new(
        &cfg,
        metadata.clone(),
        Arc::new(FsObjectStore::new(&cfg.storage_dir)),
    );
    let (user, key_hex) = seed_user(&vault, &FILES).await?;

    metadata.fail_set_algorithm.store(true, Ordering::SeqCst);
    let err = vault
        .switch_algorithm(user, Algorithm::ChaCha20, Some(&key_hex))
        .await
        .unwrap_err();
    match err {
        VaultError::MetadataDesync { user_id, from, to, .. } => {
            assert_eq!(user_id, user);
            assert_eq!(from, Algorithm::Aes256);
            assert_eq!(to, Algorithm::ChaCha20);
        }
        other => panic!("expected MetadataDesync, got {:?}", other),
    }

    // The account tag is stale but each file carries its own tag
    assert_eq!(vault.account(user).await?.algorithm, Algorithm::Aes256);
    for (name, data) in FILES {
        assert_eq!(vault.download(user, name, Some(&key_hex)).await?, data);
    }
    assert_eq!(staged_count(&cfg, user).await?, 0);
    Ok(())
}

#[tokio::test]
async fn switch_future_can_be_spawned() -> Result<()> {
    let tmp = TempDir::new()?;
    let cfg = test_config(&tmp);
    let vault = fs_vault(&cfg);
    let (user, key_hex) = seed_user(&vault, &FILES).await?;

    let switch = vault.switch_algorithm(user, Algorithm::ChaCha20, Some(&key_hex));
    assert_send(&switch);
    assert_eq!(switch.await?.migrated.len(), 3);
    Ok(())
}

#[tokio::test]
async fn failed_promotion_and_retag_names_promoted_files() -> Result<()> {
    let tmp = TempDir::new()?;
    let cfg = test_config(&tmp);
    let metadata = Arc::new(FailingMetadataStore::new());
    let vault = Vault::new(
        &cfg,
        metadata.clone(),
        Arc::new(FailingObjectStore::new(&cfg.storage_dir, 0, 2)),
    );
    let (user, key_hex) = seed_user(&vault, &FILES).await?;
    let first = vault.list_files(user).await?.remove(0);

    metadata.fail_retag.store(true, Ordering::SeqCst);
    let err = vault
        .switch_algorithm(user, Algorithm::ChaCha20, Some(&key_hex))
        .await
        .unwrap_err();
    match err {
        VaultError::MetadataDesync { reason, to, .. } => {
            assert_eq!(to, Algorithm::ChaCha20);
            assert!(reason.contains(&first.storage_name), "reason: {}", reason);
            assert!(reason.contains("retag rejected"), "reason: {}", reason);
            assert!(reason.contains("after 1 of 3"), "reason: {}", reason);
        }
        other => panic!("expected MetadataDesync, got {:?}", other),
    }

    // The promoted file is ChaCha20 on disk while its record still says AES
    let key = SecretKey::from_hex(&key_hex)?;
    let raw = std::fs::read(object_path(&cfg, user, &first.storage_name))?;
    envelope::decrypt(&raw, &key, Algorithm::ChaCha20)?;
    assert!(pending_objects(&cfg, user)?.is_empty());
    assert_eq!(staged_count(&cfg, user).await?, 0);
    Ok(())
}

#[tokio::test]
async fn concurrent_switches_are_serialized() -> Result<()> {
    let tmp = TempDir::new()?;
    let cfg = test_config(&tmp);
    let vault = Arc::new(fs_vault(&cfg));
    let (user, key_hex) = seed_user(&vault, &FILES).await?;

    let mut handles = Vec::new();
    for target in [Algorithm::ChaCha20, Algorithm::Aes256, Algorithm::ChaCha20] {
        let vault = vault.clone();
        let key_hex = key_hex.clone();
        handles.push(tokio::spawn(async move {
            vault.switch_algorithm(user, target, Some(&key_hex)).await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let algorithm = vault.account(user).await?.algorithm;
    for record in vault.list_files(user).await? {
        assert_eq!(record.algorithm, Some(algorithm));
    }
    for (name, data) in FILES {
        assert_eq!(vault.download(user, name, Some(&key_hex)).await?, data);
    }
    Ok(())
}

#[tokio::test]
async fn parallel_workers_migrate_everything() -> Result<()> {
    let tmp = TempDir::new()?;
    let mut cfg = test_config(&tmp);
    cfg.migration_workers = 4;
    let vault = fs_vault(&cfg);

    let names: Vec<String> = (0..10).map(|i| format!("file_{}.bin", i)).collect();
    let contents: Vec<Vec<u8>> = (0..10).map(|i| vec![i as u8; 1000 * (i + 1)]).collect();
    let files: Vec<(&str, &[u8])> = names
        .iter()
        .zip(contents.iter())
        .map(|(n, c)| (n.as_str(), c.as_slice()))
        .collect();
    let (user, key_hex) = seed_user(&vault, &files).await?;

    let report = vault
        .switch_algorithm(user, Algorithm::ChaCha20, Some(&key_hex))
        .await?;
    assert_eq!(report.migrated.len(), 10);

    for (name, data) in files {
        assert_eq!(vault.download(user, name, Some(&key_hex)).await?, data);
    }
    assert_eq!(staged_count(&cfg, user).await?, 0);
    assert!(pending_objects(&cfg, user)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn upload_reports_each_file() -> Result<()> {
    let tmp = TempDir::new()?;
    let cfg = test_config(&tmp);
    let vault = fs_vault(&cfg);
    let account = vault.add_user("carol").await?;

    // Encrypted upload before any key exists
    let report = vault
        .upload(
            account.id,
            vec![
                UploadFile::new("x.txt", b"x".to_vec()),
                UploadFile::new("y.txt", b"y".to_vec()),
            ],
            UploadOptions {
                encrypted: true,
                key_hex: None,
            },
        )
        .await?;
    assert_eq!(report.failed(), 2);
    for entry in &report.outcomes {
        assert_eq!(
            entry.outcome,
            UploadOutcome::Failed {
                reason: "you don't have a secret key".to_string()
            }
        );
    }

    let key_hex = vault.generate_key(account.id).await?.as_str().to_owned();
    let other = SecretKey::generate().to_hex().as_str().to_owned();
    let report = vault
        .upload(
            account.id,
            vec![UploadFile::new("x.txt", b"x".to_vec())],
            UploadOptions {
                encrypted: true,
                key_hex: Some(other),
            },
        )
        .await?;
    assert_eq!(
        report.outcomes[0].outcome,
        UploadOutcome::Failed {
            reason: "invalid secret key".to_string()
        }
    );

    // Same filename twice in one batch: second one conflicts
    let report = vault
        .upload(
            account.id,
            vec![
                UploadFile::new("x.txt", b"first".to_vec()),
                UploadFile::new("x.txt", b"second".to_vec()),
                UploadFile::new("z.txt", b"z".to_vec()),
            ],
            UploadOptions {
                encrypted: true,
                key_hex: Some(key_hex.clone()),
            },
        )
        .await?;
    assert_eq!(report.uploaded(), 2);
    assert!(matches!(report.outcomes[0].outcome, UploadOutcome::Uploaded { .. }));
    assert!(matches!(report.outcomes[1].outcome, UploadOutcome::Failed { .. }));
    assert!(matches!(report.outcomes[2].outcome, UploadOutcome::Uploaded { .. }));

    assert_eq!(vault.download(account.id, "x.txt", Some(&key_hex)).await?, b"first");
    assert_eq!(vault.list_files(account.id).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn download_errors() -> Result<()> {
    let tmp = TempDir::new()?;
    let cfg = test_config(&tmp);
    let vault = fs_vault(&cfg);
    let (user, key_hex) = seed_user(&vault, &FILES).await?;

    assert!(vault
        .download(user, "nope.txt", Some(&key_hex))
        .await
        .unwrap_err()
        .is_not_found());

    let other = SecretKey::generate().to_hex();
    assert!(vault
        .download(user, "a.txt", Some(other.as_str()))
        .await
        .unwrap_err()
        .is_authentication());

    assert!(matches!(
        vault.download(user, "a.txt", None).await,
        Err(VaultError::Configuration(_))
    ));

    let out = tmp.path().join("out").join("a.txt");
    let written = vault
        .download_to(user, "a.txt", Some(&key_hex), &out)
        .await?;
    assert_eq!(written, 10);
    assert_eq!(std::fs::read(&out)?, b"first file");
    Ok(())
}

#[tokio::test]
async fn delete_by_filename_and_storage_name() -> Result<()> {
    let tmp = TempDir::new()?;
    let cfg = test_config(&tmp);
    let vault = fs_vault(&cfg);
    let (user, key_hex) = seed_user(&vault, &FILES).await?;

    let b = vault
        .list_files(user)
        .await?
        .into_iter()
        .find(|f| f.filename == "b.pdf")
        .unwrap();

    vault
        .delete(user, FileSelector::Filename("a.txt".to_string()))
        .await?;
    vault
        .delete(user, FileSelector::StorageName(b.storage_name.clone()))
        .await?;
    assert!(!object_path(&cfg, user, &b.storage_name).exists());

    let remaining = vault.list_files(user).await?;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].filename, "c");

    assert!(vault
        .download(user, "a.txt", Some(&key_hex))
        .await
        .unwrap_err()
        .is_not_found());
    assert!(vault
        .delete(user, FileSelector::Filename("a.txt".to_string()))
        .await
        .unwrap_err()
        .is_not_found());
    Ok(())
}

#[tokio::test]
async fn delete_with_missing_object_keeps_record() -> Result<()> {
    let tmp = TempDir::new()?;
    let cfg = test_config(&tmp);
    let vault = fs_vault(&cfg);
    let (user, _key_hex) = seed_user(&vault, &FILES).await?;

    let a = vault.list_files(user).await?.remove(0);
    std::fs::remove_file(object_path(&cfg, user, &a.storage_name))?;

    let err = vault
        .delete(user, FileSelector::Filename("a.txt".to_string()))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(vault.list_files(user).await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn state_survives_reopen() -> Result<()> {
    let tmp = TempDir::new()?;
    let cfg = test_config(&tmp);

    let (user, key_hex) = {
        let vault = Vault::open(&cfg).await?;
        let seeded = seed_user(&vault, &FILES).await?;
        vault
            .switch_algorithm(seeded.0, Algorithm::ChaCha20, Some(&seeded.1))
            .await?;
        seeded
    };

    let vault = Vault::open(&cfg).await?;
    let account = vault.account(user).await?;
    assert!(account.has_key);
    assert_eq!(account.algorithm, Algorithm::ChaCha20);
    assert!(vault.verify_key(user, &key_hex).await);

    // Keys are generated once per account
    assert!(matches!(
        vault.generate_key(user).await,
        Err(VaultError::Conflict(_))
    ));

    for (name, data) in FILES {
        assert_eq!(vault.download(user, name, Some(&key_hex)).await?, data);
    }
    Ok(())
}

#[tokio::test]
async fn sweep_removes_leftover_plaintext() -> Result<()> {
    let tmp = TempDir::new()?;
    let mut cfg = test_config(&tmp);
    cfg.staging_retention_secs = 0;
    let vault = fs_vault(&cfg);

    let staging = StagingArea::new(&cfg.staging_dir);
    staging.write(7, "orphan.txt", b"leftover").await?;
    assert_eq!(staging.staged_count(7).await?, 1);

    assert_eq!(vault.staged_files(7).await?, 1);
    assert_eq!(vault.sweep_staging().await?, 1);
    assert_eq!(vault.staged_files(7).await?, 0);
    Ok(())
}

#[tokio::test]
async fn janitor_sweeps_in_background() -> Result<()> {
    let tmp = TempDir::new()?;
    let mut cfg = test_config(&tmp);
    cfg.staging_retention_secs = 0;
    let vault = fs_vault(&cfg);

    StagingArea::new(&cfg.staging_dir)
        .write(3, "orphan.bin", b"leftover")
        .await?;

    let janitor = vault.spawn_staging_janitor(std::time::Duration::from_millis(20));
    let mut remaining = 1;
    for _ in 0..50 {
        remaining = vault.staged_files(3).await?;
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    janitor.abort();
    assert_eq!(remaining, 0);
    Ok(())
}

#[tokio::test]
async fn algorithm_catalogue() -> Result<()> {
    let tmp = TempDir::new()?;
    let vault = fs_vault(&test_config(&tmp));
    assert_eq!(vault.algorithms(), &[Algorithm::Aes256, Algorithm::ChaCha20]);
    Ok(())
}

#[tokio::test]
async fn seal_and_open_local_file() -> Result<()> {
    let tmp = TempDir::new()?;
    let sealed = tmp.path().join("secret.bin");
    let opened = tmp.path().join("secret.txt");
    let key_hex = SecretKey::generate().to_hex();
    let service = FileCryptoService::new();

    service
        .encrypt_file(b"integration secret", &sealed, &key_hex, Algorithm::ChaCha20)
        .await?;
    assert_eq!(
        std::fs::metadata(&sealed)?.len() as usize,
        b"integration secret".len() + envelope::MIN_ENVELOPE_LEN
    );

    service
        .decrypt_file(&sealed, &opened, &key_hex, Algorithm::ChaCha20)
        .await?;
    assert_eq!(std::fs::read(&opened)?, b"integration secret");

    let err = service
        .decrypt_file(&sealed, &opened, &key_hex, Algorithm::Aes256)
        .await
        .unwrap_err();
    assert!(err.is_authentication());
    Ok(())
}
