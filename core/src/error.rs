//! Error taxonomy for staging and synchronization.

use std::path::PathBuf;
use std::time::Duration;

use folio_keyring_store::CredentialStoreError;
use folio_store_client::StoreError;
use thiserror::Error;

use crate::asset::CollectionId;
use crate::manifest::ManifestError;

pub type Result<T> = std::result::Result<T, FolioError>;

/// One upload that did not make it to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFailure {
    pub path: String,
    pub error: StoreError,
}

#[derive(Debug, Error)]
pub enum FolioError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Parse(#[from] ManifestError),

    #[error("index {index} out of range for {collection} ({len} records)")]
    Index {
        collection: CollectionId,
        index: usize,
        len: usize,
    },

    #[error("{} of {total} uploads failed: {}", failures.len(), describe_failures(failures))]
    UploadFailed {
        total: usize,
        failures: Vec<UploadFailure>,
    },

    #[error("a synchronization attempt is already in progress")]
    SyncInProgress,

    #[error("synchronization attempt exceeded {0:?}")]
    Timeout(Duration),

    #[error("credential storage error: {0}")]
    Credential(#[from] CredentialStoreError),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn describe_failures(failures: &[UploadFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("{} ({})", failure.path, failure.error))
        .collect::<Vec<_>>()
        .join(", ")
}

impl FolioError {
    /// True when the remote rejected the credential, either directly or for
    /// any of the concurrent uploads.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            FolioError::Store(err) => err.is_unauthorized(),
            FolioError::UploadFailed { failures, .. } => failures
                .iter()
                .any(|failure| failure.error.is_unauthorized()),
            _ => false,
        }
    }
}
