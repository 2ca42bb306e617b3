//! Per-user secret key lifecycle.
//!
//! Each account owns at most one 256-bit key. It is generated once, handed
//! to the caller as 64 lowercase hex characters and never stored: only an
//! Argon2id PHC string of the hex text is persisted, and every encrypted
//! operation is authorized by verifying the supplied key against it.
//!
//! ## Security Features
//!
//! - Keys are zeroized on drop
//! - Random generation via `OsRng`
//! - Hashing and verification run on the blocking pool

use crate::error::{Result, VaultError};
use crate::metadata::{MetadataStore, UserId};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Argon2, Params, Version};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroizing;

pub const KEY_LEN: usize = 32;
pub const KEY_HEX_LEN: usize = KEY_LEN * 2;

/// Raw 256-bit symmetric key
pub struct SecretKey {
    bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl SecretKey {
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut bytes[..]);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    /// Decodes a 64-character hex key.
    pub fn from_hex(key_hex: &str) -> Result<Self> {
        if key_hex.len() != KEY_HEX_LEN {
            return Err(VaultError::configuration(format!(
                "secret key must be {} hex characters, got {}",
                KEY_HEX_LEN,
                key_hex.len()
            )));
        }
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        hex::decode_to_slice(key_hex, &mut bytes[..])
            .map_err(|e| VaultError::configuration(format!("malformed secret key: {}", e)))?;
        Ok(Self { bytes })
    }

    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.bytes[..]))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id cost parameters for key hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            memory_kib: 19456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl HashParams {
    fn hasher(&self) -> Result<Argon2<'static>> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| VaultError::configuration(format!("invalid Argon2 parameters: {}", e)))?;
        Ok(Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Salted Argon2id hash of a hex key, as a PHC string.
pub fn hash_key(key_hex: &str, params: &HashParams) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = params
        .hasher()?
        .hash_password(key_hex.as_bytes(), &salt)
        .map_err(|e| VaultError::storage(format!("hashing secret key: {}", e)))?;
    Ok(hash.to_string())
}

/// Verifies `key_hex` against a PHC string; any parse or match failure is `false`.
pub fn verify_key_hash(key_hex: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(key_hex.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!(error = %e, "stored key hash is not a valid PHC string");
            false
        }
    }
}

/// Generates and verifies per-user keys against the metadata store.
#[derive(Clone)]
pub struct KeyManager {
    store: Arc<dyn MetadataStore>,
    params: HashParams,
}

impl KeyManager {
    pub fn new(store: Arc<dyn MetadataStore>, params: HashParams) -> Self {
        Self { store, params }
    }

    /// Creates the user's key and returns it in hex. This is the only time
    /// the plaintext key leaves the vault.
    pub async fn generate_key(&self, user_id: UserId) -> Result<Zeroizing<String>> {
        let (_, has_key) = self.store.get_user_secret_hash(user_id).await?;
        if has_key {
            warn!(user_id, "refusing to generate a second secret key");
            return Err(VaultError::conflict(format!("user {} already has a secret key", user_id)));
        }

        let key_hex = SecretKey::generate().to_hex();
        let params = self.params;
        let to_hash = key_hex.clone();
        let hash = tokio::task::spawn_blocking(move || hash_key(&to_hash, &params))
            .await
            .map_err(|e| VaultError::storage(format!("hashing task failed: {}", e)))??;

        self.store.set_user_secret_hash(user_id, &hash).await?;
        info!(user_id, "secret key generated");
        Ok(key_hex)
    }

    /// True only if `key_hex` is exactly the key generated for this user.
    pub async fn verify_key(&self, user_id: UserId, key_hex: &str) -> bool {
        if key_hex.len() != KEY_HEX_LEN || hex::decode(key_hex).is_err() {
            return false;
        }
        let hash = match self.store.get_user_secret_hash(user_id).await {
            Ok((Some(hash), true)) => hash,
            Ok(_) => return false,
            Err(e) => {
                warn!(user_id, error = %e, "could not load key hash");
                return false;
            }
        };
        let supplied = Zeroizing::new(key_hex.to_string());
        tokio::task::spawn_blocking(move || verify_key_hash(&supplied, &hash))
            .await
            .unwrap_or(false)
    }

    /// Verifies and decodes in one step.
    pub async fn authorize(&self, user_id: UserId, key_hex: &str) -> Result<SecretKey> {
        if !self.verify_key(user_id, key_hex).await {
            warn!(user_id, "secret key rejected");
            return Err(VaultError::authentication("invalid secret key"));
        }
        SecretKey::from_hex(key_hex)
    }
}
