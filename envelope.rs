//! Cipher envelope codec.
//!
//! Both AEAD schemes share one on-disk framing, so an envelope is
//! self-describing given the key and the algorithm tag:
//!
//! ```text
//! [nonce:12][ciphertext:N-28][tag:16]
//! ```
//!
//! No associated data is bound. A fresh nonce is drawn from `OsRng` for
//! every call to [`encrypt`].
//!
//! The AES-256-GCM path seals the body in place inside the output buffer
//! (detached tag appended afterwards), so a file is held in memory once.
//! ChaCha20-Poly1305 uses the one-shot API, which already appends the tag.
//! Bodies are not split into chunks: the object store exchanges whole
//! buffers, so each file is sealed as a single AEAD message.

use crate::algorithm::Algorithm;
use crate::error::{Result, VaultError};
use crate::key_manager::SecretKey;
use aes_gcm::Aes256Gcm;
use chacha20poly1305::aead::{Aead, AeadInPlace, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use rand_core::{OsRng, RngCore};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
/// Envelope of a zero-length plaintext
pub const MIN_ENVELOPE_LEN: usize = NONCE_LEN + TAG_LEN;

/// Encrypts `plaintext` into a `nonce || ciphertext || tag` envelope.
pub fn encrypt(plaintext: &[u8], key: &SecretKey, algorithm: Algorithm) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    seal_with_nonce(plaintext, key, algorithm, &nonce)
}

/// Opens an envelope, returning the plaintext only if the tag verifies.
#[allow(deprecated)]
pub fn decrypt(envelope: &[u8], key: &SecretKey, algorithm: Algorithm) -> Result<Vec<u8>> {
    if envelope.len() < MIN_ENVELOPE_LEN {
        return Err(VaultError::integrity(format!(
            "envelope is {} bytes, minimum is {}",
            envelope.len(),
            MIN_ENVELOPE_LEN
        )));
    }

    let (nonce, rest) = envelope.split_at(NONCE_LEN);
    let (body, tag) = rest.split_at(rest.len() - TAG_LEN);

    match algorithm {
        Algorithm::Aes256 => {
            let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                .map_err(|_| VaultError::configuration("AES-256 requires a 32-byte key"))?;
            let mut buffer = body.to_vec();
            cipher
                .decrypt_in_place_detached(
                    aes_gcm::Nonce::from_slice(nonce),
                    b"",
                    &mut buffer,
                    aes_gcm::Tag::from_slice(tag),
                )
                .map_err(|_| VaultError::integrity("AES-256 authentication tag mismatch"))?;
            Ok(buffer)
        }
        Algorithm::ChaCha20 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
                .map_err(|_| VaultError::configuration("ChaCha20 requires a 32-byte key"))?;
            cipher
                .decrypt(chacha20poly1305::Nonce::from_slice(nonce), rest)
                .map_err(|_| VaultError::integrity("ChaCha20 authentication tag mismatch"))
        }
    }
}

#[allow(deprecated)]
pub(crate) fn seal_with_nonce(
    plaintext: &[u8],
    key: &SecretKey,
    algorithm: Algorithm,
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(MIN_ENVELOPE_LEN + plaintext.len());
    out.extend_from_slice(nonce);

    match algorithm {
        Algorithm::Aes256 => {
            let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                .map_err(|_| VaultError::configuration("AES-256 requires a 32-byte key"))?;
            out.extend_from_slice(plaintext);
            let tag = cipher
                .encrypt_in_place_detached(
                    aes_gcm::Nonce::from_slice(nonce),
                    b"",
                    &mut out[NONCE_LEN..],
                )
                .map_err(|e| VaultError::storage(format!("AES-256 encryption failed: {}", e)))?;
            out.extend_from_slice(&tag);
        }
        Algorithm::ChaCha20 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
                .map_err(|_| VaultError::configuration("ChaCha20 requires a 32-byte key"))?;
            let sealed = cipher
                .encrypt(chacha20poly1305::Nonce::from_slice(nonce), plaintext)
                .map_err(|e| VaultError::storage(format!("ChaCha20 encryption failed: {}", e)))?;
            out.extend_from_slice(&sealed);
        }
    }

    Ok(out)
}
