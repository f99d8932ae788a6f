//! Credential persistence backed by the operating system keyring.
//!
//! The [`CredentialStore`] trait is the seam the rest of the workspace talks
//! to. [`KeyringCredentialStore`] is the production implementation;
//! [`MemoryCredentialStore`] keeps values in-process for tests and for
//! sessions that must not touch the keyring.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

/// Errors raised while reading or writing a stored credential.
#[derive(Debug, Error)]
pub enum CredentialStoreError {
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("credential store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, CredentialStoreError>;

/// Key-value storage for opaque secrets.
pub trait CredentialStore: Send + Sync {
    /// Returns the secret stored under `account`, or `None` when absent.
    fn load(&self, account: &str) -> Result<Option<String>>;

    fn save(&self, account: &str, secret: &str) -> Result<()>;

    /// Removes the secret. Returns `true` if something was deleted.
    fn delete(&self, account: &str) -> Result<bool>;
}

/// Stores secrets in the platform keyring under a fixed service name.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, account: &str) -> Result<keyring::Entry> {
        Ok(keyring::Entry::new(&self.service, account)?)
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load(&self, account: &str) -> Result<Option<String>> {
        match self.entry(account)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => {
                tracing::warn!(service = %self.service, account, "keyring load failed: {err}");
                Err(err.into())
            }
        }
    }

    fn save(&self, account: &str, secret: &str) -> Result<()> {
        self.entry(account)?.set_password(secret)?;
        tracing::debug!(service = %self.service, account, "credential saved to keyring");
        Ok(())
    }

    fn delete(&self, account: &str) -> Result<bool> {
        match self.entry(account)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-process credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with one secret.
    pub fn with_secret(account: &str, secret: &str) -> Self {
        let store = Self::default();
        if let Ok(mut secrets) = store.secrets.lock() {
            secrets.insert(account.to_string(), secret.to_string());
        }
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, account: &str) -> Result<Option<String>> {
        let secrets = self
            .secrets
            .lock()
            .map_err(|_| CredentialStoreError::Poisoned)?;
        Ok(secrets.get(account).cloned())
    }

    fn save(&self, account: &str, secret: &str) -> Result<()> {
        let mut secrets = self
            .secrets
            .lock()
            .map_err(|_| CredentialStoreError::Poisoned)?;
        secrets.insert(account.to_string(), secret.to_string());
        Ok(())
    }

    fn delete(&self, account: &str) -> Result<bool> {
        let mut secrets = self
            .secrets
            .lock()
            .map_err(|_| CredentialStoreError::Poisoned)?;
        Ok(secrets.remove(account).is_some())
    }
}
