//! In-process content store.
//!
//! Mirrors the remote contract (tokens are SHA-1 of the content, stale or
//! missing tokens are conflicts, deleting a missing object is `NotFound`) and
//! records every call so tests can assert on remote traffic.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use sha1::{Digest, Sha1};

use crate::error::{Result, StoreError};
use crate::token::AccessToken;
use crate::{ContentStore, StoreConnector, StoredObject, VersionToken};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Read(String),
    Write(String),
    Delete(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub reads: usize,
    pub writes: usize,
    pub deletes: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.reads + self.writes + self.deletes
    }

    pub fn mutations(&self) -> usize {
        self.writes + self.deletes
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, Bytes>,
    calls: Vec<StoreCall>,
    messages: Vec<(String, String)>,
    pending_conflicts: HashMap<String, usize>,
    write_failures: HashMap<String, StoreError>,
    read_failures: HashMap<String, StoreError>,
    reject_credentials: bool,
}

#[derive(Debug, Default)]
pub struct MemoryContentStore {
    state: Mutex<MemoryState>,
}

fn version_of(content: &[u8]) -> VersionToken {
    VersionToken::new(format!("{:x}", Sha1::digest(content)))
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Places an object without recording a call.
    pub fn seed(&self, path: &str, content: impl Into<Bytes>) -> VersionToken {
        let content = content.into();
        let version = version_of(&content);
        self.lock().objects.insert(path.to_string(), content);
        version
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().objects.contains_key(path)
    }

    pub fn object(&self, path: &str) -> Option<Bytes> {
        self.lock().objects.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn counts(&self) -> CallCounts {
        let state = self.lock();
        let mut counts = CallCounts::default();
        for call in &state.calls {
            match call {
                StoreCall::Read(_) => counts.reads += 1,
                StoreCall::Write(_) => counts.writes += 1,
                StoreCall::Delete(_) => counts.deletes += 1,
            }
        }
        counts
    }

    /// `(path, commit message)` of every successful write and delete.
    pub fn messages(&self) -> Vec<(String, String)> {
        self.lock().messages.clone()
    }

    pub fn clear_calls(&self) {
        let mut state = self.lock();
        state.calls.clear();
        state.messages.clear();
    }

    /// The next `times` writes or deletes of `path` fail with `Conflict`, as
    /// if another writer had changed the object in between.
    pub fn inject_conflicts(&self, path: &str, times: usize) {
        self.lock().pending_conflicts.insert(path.to_string(), times);
    }

    /// Every write to `path` fails with `err` until cleared.
    pub fn fail_writes(&self, path: &str, err: StoreError) {
        self.lock().write_failures.insert(path.to_string(), err);
    }

    /// Every read of `path` fails with `err` until cleared.
    pub fn fail_reads(&self, path: &str, err: StoreError) {
        self.lock().read_failures.insert(path.to_string(), err);
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.write_failures.clear();
        state.read_failures.clear();
        state.pending_conflicts.clear();
    }

    pub fn reject_credentials(&self, reject: bool) {
        self.lock().reject_credentials = reject;
    }
}

impl MemoryState {
    fn check_credentials(&self) -> Result<()> {
        if self.reject_credentials {
            return Err(StoreError::Unauthorized("Bad credentials".to_string()));
        }
        Ok(())
    }

    fn take_conflict(&mut self, path: &str) -> bool {
        match self.pending_conflicts.get_mut(path) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn read(&self, path: &str) -> Result<StoredObject> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Read(path.to_string()));
        state.check_credentials()?;
        if let Some(err) = state.read_failures.get(path) {
            return Err(err.clone());
        }
        let content = state
            .objects
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                path: path.to_string(),
            })?;
        let version = version_of(&content);
        Ok(StoredObject { content, version })
    }

    async fn write(
        &self,
        path: &str,
        content: Bytes,
        expected: Option<&VersionToken>,
        message: &str,
    ) -> Result<VersionToken> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Write(path.to_string()));
        state.check_credentials()?;
        if let Some(err) = state.write_failures.get(path) {
            return Err(err.clone());
        }
        if state.take_conflict(path) {
            return Err(StoreError::Conflict {
                path: path.to_string(),
            });
        }
        let current = state.objects.get(path).map(|bytes| version_of(bytes));
        if current.as_ref() != expected {
            return Err(StoreError::Conflict {
                path: path.to_string(),
            });
        }
        let version = version_of(&content);
        state.objects.insert(path.to_string(), content);
        state
            .messages
            .push((path.to_string(), message.to_string()));
        Ok(version)
    }

    async fn delete(&self, path: &str, version: &VersionToken, message: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Delete(path.to_string()));
        state.check_credentials()?;
        if state.take_conflict(path) {
            return Err(StoreError::Conflict {
                path: path.to_string(),
            });
        }
        let Some(current) = state.objects.get(path).map(|bytes| version_of(bytes)) else {
            return Err(StoreError::NotFound {
                path: path.to_string(),
            });
        };
        if &current != version {
            return Err(StoreError::Conflict {
                path: path.to_string(),
            });
        }
        state.objects.remove(path);
        state
            .messages
            .push((path.to_string(), message.to_string()));
        Ok(())
    }
}

impl StoreConnector for Arc<MemoryContentStore> {
    fn connect(&self, _token: &AccessToken) -> Result<Arc<dyn ContentStore>> {
        Ok(Arc::clone(self) as Arc<dyn ContentStore>)
    }
}
