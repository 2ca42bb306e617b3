//! Configuration management with environment variable support.
//!
//! This module provides [`Config`] for loading and validating vault settings
//! from JSON files and environment variables.
//!
//! ## Environment Variables
//!
//! - `FILEVAULT_STORAGE_DIR`: Override object storage directory
//! - `FILEVAULT_STAGING_DIR`: Override staging directory
//! - `FILEVAULT_METADATA_PATH`: Override metadata document path
//! - `FILEVAULT_CONFIG`: Override config file path

use crate::algorithm::Algorithm;
use crate::key_manager::HashParams;
use crate::migration::MissingFilePolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable names for configuration overrides
pub const ENV_STORAGE_DIR: &str = "FILEVAULT_STORAGE_DIR";
pub const ENV_STAGING_DIR: &str = "FILEVAULT_STAGING_DIR";
pub const ENV_METADATA_PATH: &str = "FILEVAULT_METADATA_PATH";
pub const ENV_CONFIG_PATH: &str = "FILEVAULT_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage_dir: String,
    pub staging_dir: String,
    pub metadata_path: String,
    /// Algorithm assigned to newly added users
    pub default_algorithm: Algorithm,
    pub missing_file_policy: MissingFilePolicy,
    /// Concurrent per-file steps during a migration; 1 is sequential
    pub migration_workers: usize,
    pub staging_retention_secs: u64,
    pub argon2: HashParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: "./uploads".to_string(),
            staging_dir: "./staging".to_string(),
            metadata_path: "./vault.json".to_string(),
            default_algorithm: Algorithm::Aes256,
            missing_file_policy: MissingFilePolicy::Abort,
            migration_workers: 1,
            staging_retention_secs: 300,
            argon2: HashParams::default(),
        }
    }
}

impl Config {
    /// Load config from file path
    pub fn load(path: &str) -> Result<Self> {
        let s =
            fs::read_to_string(path).with_context(|| format!("reading config file {}", path))?;
        let mut config: Config = serde_json::from_str(&s)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config with environment variable overrides
    /// Priority: ENV vars > config file > defaults
    pub fn load_with_env(path: Option<&str>) -> Result<Self> {
        let config_path = path
            .map(String::from)
            .or_else(|| env::var(ENV_CONFIG_PATH).ok());

        let mut config = match config_path {
            Some(ref p) if Path::new(p).exists() => {
                info!(path = p, "loading config from file");
                let s = fs::read_to_string(p)
                    .with_context(|| format!("reading config file {}", p))?;
                serde_json::from_str(&s)?
            }
            _ => {
                debug!("using default configuration");
                Config::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(storage_dir) = env::var(ENV_STORAGE_DIR) {
            debug!(storage_dir = %storage_dir, "overriding storage_dir from environment");
            self.storage_dir = storage_dir;
        }

        if let Ok(staging_dir) = env::var(ENV_STAGING_DIR) {
            debug!(staging_dir = %staging_dir, "overriding staging_dir from environment");
            self.staging_dir = staging_dir;
        }

        if let Ok(metadata_path) = env::var(ENV_METADATA_PATH) {
            debug!(metadata_path = %metadata_path, "overriding metadata_path from environment");
            self.metadata_path = metadata_path;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.storage_dir.trim().is_empty() {
            anyhow::bail!("storage_dir cannot be empty");
        }

        if self.staging_dir.trim().is_empty() {
            anyhow::bail!("staging_dir cannot be empty");
        }

        if self.metadata_path.trim().is_empty() {
            anyhow::bail!("metadata_path cannot be empty");
        }

        if self.migration_workers == 0 {
            anyhow::bail!("migration_workers must be at least 1");
        }

        // Staged plaintext must never be addressable as a stored object
        let storage = Path::new(&self.storage_dir);
        let staging = Path::new(&self.staging_dir);
        if staging == storage || staging.starts_with(storage) {
            anyhow::bail!("staging_dir cannot live inside storage_dir");
        }

        if self.missing_file_policy == MissingFilePolicy::Skip {
            warn!("missing_file_policy is 'skip': migrations may leave files under the previous algorithm");
        }

        let staging_str = self.staging_dir.to_lowercase();
        if staging_str.contains("public") || staging_str.contains("www") || staging_str.contains("htdocs") {
            warn!(
                path = %self.staging_dir,
                "staging directory appears to be in a public directory - plaintext is written there during migrations"
            );
        }

        Ok(())
    }

    /// Create a new config with explicit directories and defaults for the rest
    pub fn new(
        storage_dir: impl Into<String>,
        staging_dir: impl Into<String>,
        metadata_path: impl Into<String>,
    ) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            staging_dir: staging_dir.into(),
            metadata_path: metadata_path.into(),
            ..Self::default()
        }
    }

    pub fn staging_retention(&self) -> Duration {
        Duration::from_secs(self.staging_retention_secs)
    }
}
