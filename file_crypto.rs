//! Applies the envelope codec to file content at rest.

use crate::algorithm::Algorithm;
use crate::envelope;
use crate::error::{Result, VaultError};
use crate::key_manager::SecretKey;
use crate::util::write_atomic;
use std::path::Path;
use tokio::fs;
use tracing::{debug, error, info};

/// Stateless helpers that take the key as hex, the way callers supply it.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileCryptoService;

impl FileCryptoService {
    pub fn new() -> Self {
        Self
    }

    /// Seals bytes into an envelope.
    pub fn seal(&self, plaintext: &[u8], key_hex: &str, algorithm: Algorithm) -> Result<Vec<u8>> {
        let key = SecretKey::from_hex(key_hex)?;
        envelope::encrypt(plaintext, &key, algorithm)
    }

    /// Opens an envelope back into plaintext bytes.
    pub fn open(&self, sealed: &[u8], key_hex: &str, algorithm: Algorithm) -> Result<Vec<u8>> {
        let key = SecretKey::from_hex(key_hex)?;
        envelope::decrypt(sealed, &key, algorithm)
    }

    /// Encrypts `plaintext` to `destination`, creating parent directories.
    /// The file only appears once fully written.
    pub async fn encrypt_file(
        &self,
        plaintext: &[u8],
        destination: &Path,
        key_hex: &str,
        algorithm: Algorithm,
    ) -> Result<()> {
        debug!(path = %destination.display(), size = plaintext.len(), %algorithm, "encrypting file");
        let sealed = self.seal(plaintext, key_hex, algorithm)?;
        write_atomic(destination, &sealed).await?;
        info!(path = %destination.display(), original_size = plaintext.len(), encrypted_size = sealed.len(), %algorithm, "file encrypted successfully");
        Ok(())
    }

    /// Decrypts `source` to `destination`. Nothing is written unless the
    /// envelope authenticates.
    pub async fn decrypt_file(
        &self,
        source: &Path,
        destination: &Path,
        key_hex: &str,
        algorithm: Algorithm,
    ) -> Result<()> {
        let key = SecretKey::from_hex(key_hex)?;
        debug!(path = %source.display(), %algorithm, "decrypting file");

        let sealed = fs::read(source).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                VaultError::not_found(format!("{} can't be found", source.display()))
            }
            _ => VaultError::storage(format!("reading {}: {}", source.display(), e)),
        })?;

        let plaintext = match envelope::decrypt(&sealed, &key, algorithm) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                error!(path = %source.display(), error = %e, "decryption failed");
                return Err(e);
            }
        };
        write_atomic(destination, &plaintext).await?;
        info!(source = %source.display(), destination = %destination.display(), decrypted_size = plaintext.len(), "file decrypted successfully");
        Ok(())
    }
}
