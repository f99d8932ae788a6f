//! Staged editing of the portfolio manifest and its synchronization with the
//! content store.
//!
//! Operator edits mutate a [`StagingState`]. [`SyncOrchestrator`] turns the
//! staged diff into deletions, uploads and a manifest rewrite, then advances
//! the committed snapshot once everything landed.

mod asset;
pub mod config;
pub mod credential;
mod error;
pub mod export;
mod layout;
pub mod manifest;
pub mod media;
pub mod orchestrator;
mod staging;

pub use asset::{
    AssetEntry, AssetRecord, CollectionId, Collections, Manifest, PendingContent, default_title,
};
pub use config::{ConfigError, ConfigLoader, FolioConfig};
pub use error::{FolioError, Result, UploadFailure};
pub use export::{ExportSummary, export_bundle};
pub use layout::RemoteLayout;
pub use manifest::ManifestError;
pub use orchestrator::{
    CommitMessage, DeleteWarning, Notice, Operator, PlannedUpload, SyncOptions, SyncOrchestrator,
    SyncOutcome, SyncPhase, SyncPlan, SyncReport,
};
pub use staging::{Inserted, StagedDiff, StagedUpload, StagingState};
