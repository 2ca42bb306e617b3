//! Supported AEAD schemes.

use crate::error::VaultError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Algorithm tag stored per account and per encrypted file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// AES-256-GCM
    #[serde(rename = "AES-256", alias = "AES_256")]
    Aes256,
    /// ChaCha20-Poly1305
    #[serde(rename = "ChaCha20")]
    ChaCha20,
}

impl Algorithm {
    /// Every algorithm an account may select
    pub const ALL: [Algorithm; 2] = [Algorithm::Aes256, Algorithm::ChaCha20];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Aes256 => "AES-256",
            Algorithm::ChaCha20 => "ChaCha20",
        }
    }
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Aes256
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AES-256" | "AES_256" => Ok(Algorithm::Aes256),
            "ChaCha20" => Ok(Algorithm::ChaCha20),
            other => Err(VaultError::configuration(format!(
                "unsupported algorithm: {}",
                other
            ))),
        }
    }
}
