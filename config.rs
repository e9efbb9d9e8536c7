//! Configuration management with environment variable support.
//!
//! This module provides [`Config`] for loading and validating SecureVault
//! settings from JSON files and environment variables.
//!
//! ## Environment Variables
//!
//! - `SECUREVAULT_CONFIG`: Override config file path
//! - `SECUREVAULT_REGISTRY`: Override user registry path
//! - `SECUREVAULT_DATA_DIR`: Override output directory path
//! - `SECUREVAULT_PEPPER_PATH`: Override pepper file path
//!
//! Changing `kdf` or the pepper after files have been encrypted makes those
//! files undecryptable.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::kdf::KdfParams;

/// Environment variable names for configuration overrides
pub const ENV_CONFIG_PATH: &str = "SECUREVAULT_CONFIG";
pub const ENV_REGISTRY_PATH: &str = "SECUREVAULT_REGISTRY";
pub const ENV_DATA_DIR: &str = "SECUREVAULT_DATA_DIR";
pub const ENV_PEPPER_PATH: &str = "SECUREVAULT_PEPPER_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub registry_path: String,
    pub data_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pepper_path: Option<String>,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub kdf: KdfParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_path: "./users.json".to_string(),
            data_dir: "./user_data".to_string(),
            pepper_path: Some("./securevault.pepper".to_string()),
            compress: false,
            kdf: KdfParams::default(),
        }
    }
}

impl Config {
    /// Load config from file path
    pub fn load(path: &str) -> Result<Self> {
        let s =
            fs::read_to_string(path).with_context(|| format!("reading config file {}", path))?;
        let mut config: Config =
            serde_json::from_str(&s).with_context(|| format!("parsing config file {}", path))?;
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
                serde_json::from_str(&s).with_context(|| format!("parsing config file {}", p))?
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
        if let Ok(registry_path) = env::var(ENV_REGISTRY_PATH) {
            debug!(registry_path = %registry_path, "overriding registry_path from environment");
            self.registry_path = registry_path;
        }

        if let Ok(data_dir) = env::var(ENV_DATA_DIR) {
            debug!(data_dir = %data_dir, "overriding data_dir from environment");
            self.data_dir = data_dir;
        }

        if let Ok(pepper_path) = env::var(ENV_PEPPER_PATH) {
            debug!(pepper_path = %pepper_path, "overriding pepper_path from environment");
            self.pepper_path = Some(pepper_path);
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.registry_path.trim().is_empty() {
            anyhow::bail!("registry_path cannot be empty");
        }

        if self.data_dir.trim().is_empty() {
            anyhow::bail!("data_dir cannot be empty");
        }

        self.kdf.validate().context("validating kdf parameters")?;

        match &self.pepper_path {
            Some(pepper_path) if pepper_path.trim().is_empty() => {
                anyhow::bail!("pepper_path cannot be empty when set");
            }
            Some(pepper_path) => {
                let pepper = Path::new(pepper_path);
                if pepper.starts_with(&self.data_dir) {
                    warn!(
                        path = %pepper_path,
                        "pepper file is inside the data directory next to the files it protects"
                    );
                }
                if let Some(parent) = pepper.parent() {
                    let parent_str = parent.to_string_lossy().to_lowercase();
                    if parent_str.contains("public")
                        || parent_str.contains("www")
                        || parent_str.contains("htdocs")
                    {
                        warn!(
                            path = %pepper_path,
                            "pepper file path appears to be in a public directory - this is a security risk"
                        );
                    }
                }
            }
            None => {
                warn!("no pepper configured; keys derive from the username and salt alone");
            }
        }

        Ok(())
    }

    /// Create a new config with explicit paths and default KDF settings
    pub fn new(registry_path: impl Into<String>, data_dir: impl Into<String>) -> Self {
        Self {
            registry_path: registry_path.into(),
            data_dir: data_dir.into(),
            pepper_path: None,
            compress: false,
            kdf: KdfParams::default(),
        }
    }
}
