//! Layered configuration: built-in defaults, then `folio.toml`, then
//! `FOLIO_*` environment variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use folio_store_client::{RetryConfig, StoreConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credential::TOKEN_ACCOUNT;
use crate::layout::RemoteLayout;

pub const DEFAULT_CONFIG_FILE: &str = "folio.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("configuration file not found at path: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid configuration value: {0}")]
    Validation(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolioConfig {
    #[serde(default = "default_store")]
    pub store: StoreConfig,

    #[serde(default)]
    pub layout: RemoteLayout,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub credential: CredentialConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Upper bound for the remote phases of one attempt; 0 disables it.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

impl SyncConfig {
    pub fn attempt_timeout(&self) -> Option<Duration> {
        (self.attempt_timeout_ms > 0).then_some(Duration::from_millis(self.attempt_timeout_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    #[serde(default = "default_keyring_service")]
    pub keyring_service: String,

    #[serde(default = "default_account")]
    pub account: String,
}

fn default_store() -> StoreConfig {
    StoreConfig::new("", "")
}

fn default_attempt_timeout_ms() -> u64 {
    300_000
}

fn default_keyring_service() -> String {
    "folio".to_string()
}

fn default_account() -> String {
    TOKEN_ACCOUNT.to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            keyring_service: default_keyring_service(),
            account: default_account(),
        }
    }
}

impl Default for FolioConfig {
    fn default() -> Self {
        Self {
            store: default_store(),
            layout: RemoteLayout::default(),
            retry: RetryConfig::default(),
            sync: SyncConfig::default(),
            credential: CredentialConfig::default(),
        }
    }
}

impl FolioConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store
            .validate()
            .map_err(|err| ConfigError::Validation(format!("[store] {err}")))?;
        self.layout
            .validate()
            .map_err(|err| ConfigError::Validation(format!("[layout] {err}")))?;
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Validation(
                "[retry] initial_backoff_ms must not exceed max_backoff_ms".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Validation(
                "[retry] backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.credential.keyring_service.trim().is_empty()
            || self.credential.account.trim().is_empty()
        {
            return Err(ConfigError::Validation(
                "[credential] keyring_service and account must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads [`FolioConfig`] with layered merging.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_source: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit config file; it must exist.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Replaces the process environment as the source of `FOLIO_*` overrides.
    pub fn with_env_source(mut self, vars: HashMap<String, String>) -> Self {
        self.env_source = Some(vars);
        self
    }

    /// Defaults, then the config file, then `FOLIO_*` variables with `__`
    /// separating nested keys (`FOLIO_STORE__OWNER=octo`).
    pub fn load(&self) -> Result<FolioConfig, ConfigError> {
        let defaults = serde_json::to_string(&FolioConfig::default())?;
        let mut builder =
            Config::builder().add_source(File::from_str(&defaults, FileFormat::Json));

        if let Some(path) = &self.config_path {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            tracing::debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("FOLIO")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(self.env_source.clone()),
        );

        let config: FolioConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// `./folio.toml` when present.
    pub fn find_config_file() -> Option<PathBuf> {
        let path = PathBuf::from(DEFAULT_CONFIG_FILE);
        path.exists().then_some(path)
    }

    /// Uses `explicit` when given, otherwise the default file if it exists.
    pub fn resolve(explicit: Option<PathBuf>) -> Self {
        match explicit.or_else(Self::find_config_file) {
            Some(path) => Self::new().with_file(path),
            None => Self::new(),
        }
    }
}
