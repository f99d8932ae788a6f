//! Turns staged changes into remote operations and reconciles the outcome.
//!
//! One attempt runs `Confirming → Deleting → Uploading → RewritingManifest →
//! Reconciling`, preceded by `AwaitingCredential` when no token is saved.
//! Local state only advances once the manifest write succeeded; any earlier
//! failure leaves every staged change in place so the attempt can be
//! repeated.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use folio_keyring_store::CredentialStore;
use folio_store_client::{
    AccessToken, ContentStore, DeleteOutcome, StoreConnector, StoreError, VersionToken,
    current_version, delete_object,
};
use futures::future::join_all;
use strum_macros::Display;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::asset::CollectionId;
use crate::credential::{self, TOKEN_ACCOUNT};
use crate::error::{FolioError, Result, UploadFailure};
use crate::manifest;
use crate::staging::{StagedDiff, StagedUpload, StagingState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    AwaitingCredential,
    Confirming,
    Deleting,
    Uploading,
    RewritingManifest,
    Reconciling,
    Failed,
}

/// Commit title plus optional body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMessage {
    pub title: String,
    pub description: Option<String>,
}

impl CommitMessage {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.description = (!description.trim().is_empty()).then_some(description);
        self
    }

    /// Suggested title for a change set.
    pub fn default_for(additions: usize, deletions: usize) -> Self {
        let title = match (additions, deletions) {
            (0, 0) => "Update portfolio assets".to_string(),
            (adds, 0) => format!("Add {adds} new portfolio file{}", plural(adds)),
            (0, dels) => format!("Delete {dels} portfolio file{}", plural(dels)),
            (adds, dels) => format!("Add {adds} and delete {dels} portfolio files"),
        };
        Self::new(title)
    }

    pub fn full(&self) -> String {
        match &self.description {
            Some(description) => format!("{}\n\n{description}", self.title),
            None => self.title.clone(),
        }
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpload {
    pub collection: CollectionId,
    pub remote_path: String,
    pub size: usize,
}

/// What an attempt is about to do, shown to the operator for confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub uploads: Vec<PlannedUpload>,
    pub deletions: Vec<String>,
    pub manifest_path: String,
    pub manifest_text: String,
    pub default_message: CommitMessage,
}

impl SyncPlan {
    fn from_diff(diff: &StagedDiff, manifest_path: &str) -> Self {
        Self {
            uploads: diff
                .uploads
                .iter()
                .map(|upload| PlannedUpload {
                    collection: upload.collection,
                    remote_path: upload.remote_path.clone(),
                    size: upload.content.len(),
                })
                .collect(),
            deletions: diff.deletions.clone(),
            manifest_path: manifest_path.to_string(),
            manifest_text: manifest::encode(&diff.manifest),
            default_message: CommitMessage::default_for(diff.uploads.len(), diff.deletions.len()),
        }
    }

    pub fn preview_lines(&self) -> Vec<String> {
        self.uploads
            .iter()
            .map(|upload| format!("{} (new)", upload.remote_path))
            .chain(self.deletions.iter().map(|path| format!("{path} (deleted)")))
            .chain(std::iter::once(format!("{} (updated)", self.manifest_path)))
            .collect()
    }
}

/// Something the operator should be told while an attempt runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    InvalidCredential(String),
    CredentialForgotten,
    DeleteFailed { path: String, error: StoreError },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::InvalidCredential(reason) => write!(f, "{reason}"),
            Notice::CredentialForgotten => {
                f.write_str("the saved token was rejected and has been forgotten")
            }
            Notice::DeleteFailed { path, error } => {
                write!(f, "could not delete {path}: {error}")
            }
        }
    }
}

/// The human side of an attempt.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Raw token text, or `None` to cancel.
    async fn request_credential(&self) -> Option<String>;

    /// Commit message for `plan`, or `None` to cancel.
    async fn confirm(&self, plan: &SyncPlan) -> Option<CommitMessage>;

    fn notify(&self, notice: &Notice);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteWarning {
    pub path: String,
    pub error: StoreError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub uploaded: Vec<String>,
    pub deleted: Vec<String>,
    pub already_absent: Vec<String>,
    pub warnings: Vec<DeleteWarning>,
    pub manifest_version: VersionToken,
    pub message: CommitMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    NoChanges,
    Cancelled,
    Committed(SyncReport),
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Bound on the remote phases of one attempt.
    pub attempt_timeout: Option<Duration>,
    pub credential_account: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            attempt_timeout: None,
            credential_account: TOKEN_ACCOUNT.to_string(),
        }
    }
}

/// Runs synchronization attempts against one store.
///
/// At most one attempt runs at a time through a given orchestrator; a
/// concurrent call fails with `SyncInProgress`. The guard is per instance, so
/// callers share one orchestrator per process.
pub struct SyncOrchestrator {
    connector: Arc<dyn StoreConnector>,
    credentials: Arc<dyn CredentialStore>,
    options: SyncOptions,
    in_flight: AtomicBool,
    phase: watch::Sender<SyncPhase>,
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Gate<T> {
    Proceed(T),
    Cancelled,
}

impl SyncOrchestrator {
    pub fn new(
        connector: Arc<dyn StoreConnector>,
        credentials: Arc<dyn CredentialStore>,
        options: SyncOptions,
    ) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            connector,
            credentials,
            options,
            in_flight: AtomicBool::new(false),
            phase,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    fn enter(&self, phase: SyncPhase) {
        let previous = self.phase.send_replace(phase);
        tracing::info!(from = %previous, to = %phase, "sync phase");
    }

    /// Runs one synchronization attempt against `state`.
    ///
    /// `cancel` is honoured while waiting on the operator; once the commit is
    /// confirmed the attempt runs to completion or failure.
    pub async fn synchronize(
        &self,
        state: &mut StagingState,
        operator: &dyn Operator,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        let _guard = InFlight::acquire(&self.in_flight).ok_or(FolioError::SyncInProgress)?;
        if !state.is_dirty() {
            tracing::info!("nothing staged, skipping synchronization");
            return Ok(SyncOutcome::NoChanges);
        }

        match self.attempt(state, operator, cancel).await {
            Ok(outcome) => {
                self.enter(SyncPhase::Idle);
                Ok(outcome)
            }
            Err(err) => {
                tracing::warn!("synchronization failed: {err}");
                if err.is_unauthorized() {
                    self.forget_rejected_credential(operator);
                }
                self.enter(SyncPhase::Failed);
                Err(err)
            }
        }
    }

    async fn attempt(
        &self,
        state: &mut StagingState,
        operator: &dyn Operator,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        let token = match self.obtain_credential(operator, cancel).await? {
            Gate::Proceed(token) => token,
            Gate::Cancelled => return Ok(SyncOutcome::Cancelled),
        };
        let store = self.connector.connect(&token)?;

        let diff = state.diff();
        let manifest_path = state.layout().manifest_path.clone();
        let plan = SyncPlan::from_diff(&diff, &manifest_path);

        self.enter(SyncPhase::Confirming);
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            message = operator.confirm(&plan) => message,
        };
        let Some(message) = message else {
            tracing::info!("synchronization cancelled at confirmation");
            return Ok(SyncOutcome::Cancelled);
        };
        if message.title.trim().is_empty() {
            return Err(FolioError::Validation(
                "commit title must not be empty".to_string(),
            ));
        }

        let remote = self.apply(store.as_ref(), &diff, &plan, message, operator);
        let report = match self.options.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, remote)
                .await
                .map_err(|_| FolioError::Timeout(limit))??,
            None => remote.await?,
        };

        self.enter(SyncPhase::Reconciling);
        state.mark_committed();
        tracing::info!(
            uploaded = report.uploaded.len(),
            deleted = report.deleted.len(),
            version = %report.manifest_version,
            "synchronization committed"
        );
        Ok(SyncOutcome::Committed(report))
    }

    async fn obtain_credential(
        &self,
        operator: &dyn Operator,
        cancel: &CancellationToken,
    ) -> Result<Gate<AccessToken>> {
        let account = &self.options.credential_account;
        if let Some(token) = credential::load_token(self.credentials.as_ref(), account)? {
            return Ok(Gate::Proceed(token));
        }

        self.enter(SyncPhase::AwaitingCredential);
        loop {
            let raw = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                raw = operator.request_credential() => raw,
            };
            let Some(raw) = raw else {
                tracing::info!("synchronization cancelled while awaiting a credential");
                return Ok(Gate::Cancelled);
            };
            match AccessToken::parse(&raw) {
                Ok(token) => {
                    credential::save_token(self.credentials.as_ref(), account, &token)?;
                    return Ok(Gate::Proceed(token));
                }
                Err(err) => operator.notify(&Notice::InvalidCredential(err.to_string())),
            }
        }
    }

    fn forget_rejected_credential(&self, operator: &dyn Operator) {
        match credential::forget_token(self.credentials.as_ref(), &self.options.credential_account)
        {
            Ok(_) => operator.notify(&Notice::CredentialForgotten),
            Err(err) => tracing::warn!("failed to forget rejected credential: {err}"),
        }
    }

    async fn apply(
        &self,
        store: &dyn ContentStore,
        diff: &StagedDiff,
        plan: &SyncPlan,
        message: CommitMessage,
        operator: &dyn Operator,
    ) -> Result<SyncReport> {
        self.enter(SyncPhase::Deleting);
        let mut deleted = Vec::new();
        let mut already_absent = Vec::new();
        let mut warnings = Vec::new();
        for path in &diff.deletions {
            match delete_object(store, path, &format!("Delete {path}")).await {
                Ok(DeleteOutcome::Deleted) => {
                    tracing::info!(path, "deleted");
                    deleted.push(path.clone());
                }
                Ok(DeleteOutcome::AlreadyAbsent) => {
                    tracing::info!(path, "already absent");
                    already_absent.push(path.clone());
                }
                Err(err) if err.is_unauthorized() => return Err(err.into()),
                Err(err) => {
                    tracing::warn!(path, "delete failed: {err}");
                    operator.notify(&Notice::DeleteFailed {
                        path: path.clone(),
                        error: err.clone(),
                    });
                    warnings.push(DeleteWarning {
                        path: path.clone(),
                        error: err,
                    });
                }
            }
        }

        self.enter(SyncPhase::Uploading);
        let results = join_all(diff.uploads.iter().map(|upload| upload_file(store, upload))).await;
        let mut uploaded = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (upload, result) in diff.uploads.iter().zip(results) {
            match result {
                Ok(version) => {
                    tracing::info!(path = %upload.remote_path, %version, "uploaded");
                    uploaded.push(upload.remote_path.clone());
                }
                Err(error) => {
                    tracing::warn!(path = %upload.remote_path, "upload failed: {error}");
                    failures.push(UploadFailure {
                        path: upload.remote_path.clone(),
                        error,
                    });
                }
            }
        }
        if !failures.is_empty() {
            return Err(FolioError::UploadFailed {
                total: diff.uploads.len(),
                failures,
            });
        }

        self.enter(SyncPhase::RewritingManifest);
        let manifest_version = rewrite_manifest(
            store,
            &plan.manifest_path,
            Bytes::from(plan.manifest_text.clone()),
            &message.full(),
        )
        .await?;

        Ok(SyncReport {
            uploaded,
            deleted,
            already_absent,
            warnings,
            manifest_version,
            message,
        })
    }
}

/// Uploads one staged file, creating or replacing it. A stale token is
/// refreshed once before giving up.
async fn upload_file(
    store: &dyn ContentStore,
    upload: &StagedUpload,
) -> std::result::Result<VersionToken, StoreError> {
    let path = upload.remote_path.as_str();
    let mut refreshed = false;
    loop {
        let expected = match store.read(path).await {
            // A previous, partially failed attempt may already have stored these bytes.
            Ok(existing) if existing.content == upload.content => {
                tracing::debug!(path, "content already stored");
                return Ok(existing.version);
            }
            Ok(existing) => Some(existing.version),
            Err(StoreError::NotFound { .. }) => None,
            Err(err) => return Err(err),
        };
        let message = match expected {
            Some(_) => format!("Update {}", upload.source),
            None => format!("Add {}", upload.source),
        };
        match store
            .write(path, upload.content.clone(), expected.as_ref(), &message)
            .await
        {
            Err(StoreError::Conflict { .. }) if !refreshed => {
                tracing::debug!(path, "upload hit a stale token, re-reading");
                refreshed = true;
            }
            result => return result,
        }
    }
}

async fn rewrite_manifest(
    store: &dyn ContentStore,
    path: &str,
    content: Bytes,
    message: &str,
) -> std::result::Result<VersionToken, StoreError> {
    let mut refreshed = false;
    loop {
        let expected = current_version(store, path).await?;
        match store
            .write(path, content.clone(), expected.as_ref(), message)
            .await
        {
            Err(StoreError::Conflict { .. }) if !refreshed => {
                tracing::warn!(path, "manifest changed remotely, retrying with a fresh token");
                refreshed = true;
            }
            result => return result,
        }
    }
}
