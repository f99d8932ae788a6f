//! Working copy of the three collections and its diff against the last
//! committed snapshot.
//!
//! All operator edits land here; nothing reaches the store until the
//! orchestrator consumes [`StagingState::diff`] and, on success, calls
//! [`StagingState::mark_committed`].

use std::collections::BTreeSet;

use bytes::Bytes;

use crate::asset::{
    AssetRecord, CollectionId, Collections, Manifest, PendingContent, default_title,
    split_extension,
};
use crate::error::{FolioError, Result};
use crate::layout::RemoteLayout;
use crate::manifest::{self, ManifestError};

/// Result of an insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inserted {
    /// Identifier the record ended up with.
    pub source: String,
    /// Requested identifier, when it had to be renamed to stay unique.
    pub renamed_from: Option<String>,
}

impl Inserted {
    /// Operator-facing notice for a rename, if one happened.
    pub fn notice(&self) -> Option<String> {
        self.renamed_from
            .as_ref()
            .map(|from| format!("{from} renamed to {} to avoid conflicts", self.source))
    }
}

/// A record whose bytes must be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedUpload {
    pub collection: CollectionId,
    pub source: String,
    pub remote_path: String,
    pub content: Bytes,
}

/// Everything one synchronization attempt has to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedDiff {
    pub uploads: Vec<StagedUpload>,
    pub deletions: Vec<String>,
    /// Full target manifest; always rewritten.
    pub manifest: Manifest,
}

#[derive(Debug, Clone)]
pub struct StagingState {
    layout: RemoteLayout,
    collections: Collections<AssetRecord>,
    committed: Manifest,
    pending_deletions: BTreeSet<String>,
    dirty: bool,
}

impl StagingState {
    /// Starts from a committed manifest; nothing is staged.
    pub fn new(layout: RemoteLayout, committed: Manifest) -> Self {
        let collections = committed.map(|entry| AssetRecord::from(entry.clone()));
        Self {
            layout,
            collections,
            committed,
            pending_deletions: BTreeSet::new(),
            dirty: false,
        }
    }

    /// Decodes manifest text, falling back to empty collections when it is
    /// malformed. The parse error is handed back for reporting.
    pub fn from_manifest_text(layout: RemoteLayout, text: &str) -> (Self, Option<ManifestError>) {
        match manifest::decode(text) {
            Ok(committed) => (Self::new(layout, committed), None),
            Err(err) => {
                tracing::warn!("manifest is malformed, starting with empty collections: {err}");
                (Self::new(layout, Manifest::default()), Some(err))
            }
        }
    }

    pub fn layout(&self) -> &RemoteLayout {
        &self.layout
    }

    pub fn collection(&self, id: CollectionId) -> &[AssetRecord] {
        self.collections.get(id)
    }

    pub fn collections(&self) -> &Collections<AssetRecord> {
        &self.collections
    }

    /// Snapshot as of the last successful synchronization.
    pub fn committed(&self) -> &Manifest {
        &self.committed
    }

    pub fn pending_deletions(&self) -> &BTreeSet<String> {
        &self.pending_deletions
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn pending_upload_count(&self) -> usize {
        self.collections
            .iter()
            .map(|(_, records)| records.iter().filter(|r| r.is_pending()).count())
            .sum()
    }

    /// Inserts `record` at the head of `collection`, renaming it when its
    /// identifier collides case-insensitively with an existing record.
    pub fn insert(
        &mut self,
        collection: CollectionId,
        mut record: AssetRecord,
    ) -> Result<Inserted> {
        validate_source(&record.source)?;

        let requested = record.source.clone();
        let unique = unique_source(self.collections.get(collection), &requested);
        let renamed_from = (unique != requested).then_some(requested);
        if let Some(from) = &renamed_from {
            tracing::info!(%collection, from, to = %unique, "renamed to keep identifiers unique");
        }
        record.source = unique.clone();

        // The path is referenced again, so it must not be deleted remotely.
        let path = self.layout.remote_path(collection, &record.source);
        if self.pending_deletions.remove(&path) {
            tracing::debug!(path, "path re-added, dropped from pending deletions");
        }

        self.collections.get_mut(collection).insert(0, record);
        self.dirty = true;
        Ok(Inserted {
            source: unique,
            renamed_from,
        })
    }

    /// Stages a new upload with the default title derived from `file_name`.
    pub fn stage_upload(
        &mut self,
        collection: CollectionId,
        file_name: &str,
        content: impl Into<Bytes>,
    ) -> Result<Inserted> {
        let record = AssetRecord::staged(
            file_name,
            default_title(file_name),
            PendingContent::new(content),
        );
        self.insert(collection, record)
    }

    /// Removes and returns the record at `index`.
    ///
    /// A staged upload just loses its bytes. A committed file whose path no
    /// remaining record references is queued for remote deletion.
    pub fn remove(&mut self, collection: CollectionId, index: usize) -> Result<AssetRecord> {
        self.check_index(collection, index)?;
        let mut record = self.collections.get_mut(collection).remove(index);
        if let Some(content) = record.take_pending() {
            tracing::debug!(
                %collection,
                source = %record.source,
                bytes = content.len(),
                "released staged upload"
            );
        }

        let path = self.layout.remote_path(collection, &record.source);
        if self.was_committed(&path) && !self.is_referenced(&path) {
            tracing::info!(path, "queued for remote deletion");
            self.pending_deletions.insert(path);
        }

        self.dirty = true;
        Ok(record)
    }

    /// Moves the record at `from` so that it ends up at `to`.
    pub fn move_record(&mut self, collection: CollectionId, from: usize, to: usize) -> Result<()> {
        self.check_index(collection, from)?;
        self.check_index(collection, to)?;
        let records = self.collections.get_mut(collection);
        let record = records.remove(from);
        records.insert(to, record);
        self.dirty = true;
        Ok(())
    }

    pub fn set_title(&mut self, collection: CollectionId, index: usize, title: &str) -> Result<()> {
        self.check_index(collection, index)?;
        let title = title.trim();
        if title.is_empty() {
            return Err(FolioError::Validation("title must not be empty".to_string()));
        }
        self.collections.get_mut(collection)[index].title = title.to_string();
        self.dirty = true;
        Ok(())
    }

    /// Current `{src, title}` state of every collection.
    pub fn manifest(&self) -> Manifest {
        self.collections.map(AssetRecord::entry)
    }

    pub fn diff(&self) -> StagedDiff {
        let layout = &self.layout;
        let uploads = self
            .collections
            .iter()
            .flat_map(|(collection, records)| {
                records.iter().filter_map(move |record| {
                    record.pending().map(|content| StagedUpload {
                        collection,
                        source: record.source.clone(),
                        remote_path: layout.remote_path(collection, &record.source),
                        content: content.bytes().clone(),
                    })
                })
            })
            .collect();
        StagedDiff {
            uploads,
            deletions: self.pending_deletions.iter().cloned().collect(),
            manifest: self.manifest(),
        }
    }

    /// Advances the snapshot after a successful synchronization.
    pub fn mark_committed(&mut self) {
        for id in CollectionId::ALL {
            for record in self.collections.get_mut(id) {
                record.take_pending();
            }
        }
        self.pending_deletions.clear();
        self.committed = self.manifest();
        self.dirty = false;
    }

    fn check_index(&self, collection: CollectionId, index: usize) -> Result<()> {
        let len = self.collections.get(collection).len();
        if index >= len {
            return Err(FolioError::Index {
                collection,
                index,
                len,
            });
        }
        Ok(())
    }

    fn was_committed(&self, path: &str) -> bool {
        self.committed.iter().any(|(id, entries)| {
            entries
                .iter()
                .any(|entry| self.layout.remote_path(id, &entry.src) == path)
        })
    }

    fn is_referenced(&self, path: &str) -> bool {
        self.collections.iter().any(|(id, records)| {
            records
                .iter()
                .any(|record| self.layout.remote_path(id, &record.source) == path)
        })
    }
}

fn validate_source(source: &str) -> Result<()> {
    if source.trim().is_empty() {
        return Err(FolioError::Validation("file name must not be empty".to_string()));
    }
    if source == "." || source == ".." {
        return Err(FolioError::Validation(format!("invalid file name: {source}")));
    }
    if source.contains(['/', '\\']) || source.chars().any(char::is_control) {
        return Err(FolioError::Validation(format!(
            "file name must not contain path separators or control characters: {source:?}"
        )));
    }
    Ok(())
}

/// Returns `requested`, or `<stem>_<millis><ext>` when it collides.
fn unique_source(existing: &[AssetRecord], requested: &str) -> String {
    let taken = |candidate: &str| {
        let candidate = candidate.to_lowercase();
        existing
            .iter()
            .any(|record| record.source.to_lowercase() == candidate)
    };
    if !taken(requested) {
        return requested.to_string();
    }

    let (stem, extension) = split_extension(requested);
    let mut stamp = chrono::Utc::now().timestamp_millis();
    loop {
        let candidate = format!("{stem}_{stamp}{extension}");
        if !taken(&candidate) {
            return candidate;
        }
        stamp += 1;
    }
}
