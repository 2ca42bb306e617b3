//! # FileVault - Per-user Encrypted File Vault
//!
//! FileVault stores each user's files, optionally encrypted at rest under a
//! user-held 256-bit key with a user-selectable AEAD cipher, and migrates
//! every encrypted file when the user switches cipher.
//!
//! ## Features
//!
//! - **Two AEAD schemes**: AES-256-GCM and ChaCha20-Poly1305, one envelope format
//! - **One key per user**: generated once, verified against an Argon2id hash, never stored
//! - **Failure-safe migration**: all-or-nothing re-encryption on algorithm switch
//! - **Per-user locking**: migrations serialize per user, users never contend
//!
//! ## Quick Start
//!
//! ```no_run
//! use filevault::{config::Config, vault::{UploadFile, UploadOptions, Vault}, Algorithm};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cfg = Config::new("./uploads", "./staging", "./vault.json");
//!     let vault = Vault::open(&cfg).await?;
//!     let user = vault.add_user("alice").await?;
//!
//!     // Shown once; the vault only keeps a hash
//!     let key_hex = vault.generate_key(user.id).await?;
//!
//!     let options = UploadOptions { encrypted: true, key_hex: Some(key_hex.as_str().to_owned()) };
//!     vault.upload(user.id, vec![UploadFile::new("notes.txt", b"secret".to_vec())], options).await?;
//!
//!     vault.switch_algorithm(user.id, Algorithm::ChaCha20, Some(key_hex.as_str())).await?;
//!     let data = vault.download(user.id, "notes.txt", Some(key_hex.as_str())).await?;
//!     assert_eq!(data, b"secret");
//!     Ok(())
//! }
//! ```
//!
//! ## Envelope Format
//!
//! `[nonce:12][ciphertext][tag:16]` for both algorithms, no associated data.

pub mod algorithm;
pub mod config;
pub mod envelope;
pub mod error;
pub mod file_crypto;
pub mod key_manager;
pub mod locks;
pub mod metadata;
pub mod migration;
pub mod object_store;
pub mod staging;
pub mod util;
pub mod vault;

// Re-export common types for convenience
pub use algorithm::Algorithm;
pub use error::VaultError;
