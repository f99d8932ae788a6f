//! Client for a remote, path-addressed content store with optimistic
//! concurrency.
//!
//! Every write or delete must present the version token (content hash) the
//! caller last observed. [`ContentStore`] is the seam; [`GitHubContentStore`]
//! talks to the GitHub contents API and [`MemoryContentStore`] keeps objects
//! in-process.

mod config;
mod error;
mod github;
mod memory;
mod retry;
mod token;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

pub use config::{DEFAULT_API_BASE_URL, RetryConfig, StoreConfig};
pub use error::{Result, StoreError};
pub use github::{GitHubConnector, GitHubContentStore};
pub use memory::{CallCounts, MemoryContentStore, StoreCall};
pub use retry::with_backoff;
pub use token::{ACCEPTED_TOKEN_PREFIXES, AccessToken};

/// Opaque revision identifier returned by the store for a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current bytes of an object together with the token that guards them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content: Bytes,
    pub version: VersionToken,
}

/// Remote key-addressed store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fails with [`StoreError::NotFound`] when `path` does not exist.
    async fn read(&self, path: &str) -> Result<StoredObject>;

    /// Creates the object when `expected` is `None`, otherwise replaces it
    /// provided the stored token still equals `expected`.
    async fn write(
        &self,
        path: &str,
        content: Bytes,
        expected: Option<&VersionToken>,
        message: &str,
    ) -> Result<VersionToken>;

    /// Fails with [`StoreError::NotFound`] when the object is already gone.
    async fn delete(&self, path: &str, version: &VersionToken, message: &str) -> Result<()>;
}

/// Builds a store session for a validated credential.
pub trait StoreConnector: Send + Sync {
    fn connect(&self, token: &AccessToken) -> Result<Arc<dyn ContentStore>>;
}

/// Token currently guarding `path`, or `None` if the object does not exist.
pub async fn current_version(store: &dyn ContentStore, path: &str) -> Result<Option<VersionToken>> {
    match store.read(path).await {
        Ok(object) => Ok(Some(object.version)),
        Err(StoreError::NotFound { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
}

/// Deletes `path` using its current token.
///
/// A missing object is success: an earlier, partially completed run may
/// already have removed it. A stale token is re-read once.
pub async fn delete_object(
    store: &dyn ContentStore,
    path: &str,
    message: &str,
) -> Result<DeleteOutcome> {
    let mut refreshed = false;
    loop {
        let Some(version) = current_version(store, path).await? else {
            return Ok(DeleteOutcome::AlreadyAbsent);
        };
        match store.delete(path, &version, message).await {
            Ok(()) => return Ok(DeleteOutcome::Deleted),
            Err(StoreError::NotFound { .. }) => return Ok(DeleteOutcome::AlreadyAbsent),
            Err(StoreError::Conflict { .. }) if !refreshed => {
                tracing::debug!(path, "delete hit a stale token, re-reading");
                refreshed = true;
            }
            Err(err) => return Err(err),
        }
    }
}
