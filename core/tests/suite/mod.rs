use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use folio_core::{
    AssetEntry, CommitMessage, Manifest, Notice, Operator, RemoteLayout, StagingState,
    SyncOptions, SyncOrchestrator, SyncPlan, default_title, manifest,
};
use folio_keyring_store::{CredentialStore, MemoryCredentialStore};
use folio_store_client::MemoryContentStore;

mod export;
mod synchronize;

pub const TOKEN: &str = "ghp_integration";
pub const MANIFEST_PATH: &str = "assestsName.js";
pub const IMAGES: &str = "assets/img/portfolio/images";
pub const VIDEOS: &str = "assets/img/portfolio/videos";

#[derive(Debug, Clone)]
pub enum Confirm {
    Default,
    With(CommitMessage),
    Cancel,
}

/// Operator that answers from a script and records what it was shown.
pub struct ScriptedOperator {
    tokens: Mutex<VecDeque<String>>,
    confirm: Confirm,
    plans: Mutex<Vec<SyncPlan>>,
    notices: Mutex<Vec<Notice>>,
    credential_requests: Mutex<usize>,
}

impl ScriptedOperator {
    pub fn new(confirm: Confirm) -> Self {
        Self {
            tokens: Mutex::new(VecDeque::new()),
            confirm,
            plans: Mutex::new(Vec::new()),
            notices: Mutex::new(Vec::new()),
            credential_requests: Mutex::new(0),
        }
    }

    pub fn accepting() -> Self {
        Self::new(Confirm::Default)
    }

    pub fn with_tokens(self, tokens: &[&str]) -> Self {
        *self.tokens.lock().expect("tokens") = tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn plans(&self) -> Vec<SyncPlan> {
        self.plans.lock().expect("plans").clone()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().expect("notices").clone()
    }

    pub fn credential_requests(&self) -> usize {
        *self.credential_requests.lock().expect("requests")
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn request_credential(&self) -> Option<String> {
        *self.credential_requests.lock().expect("requests") += 1;
        self.tokens.lock().expect("tokens").pop_front()
    }

    async fn confirm(&self, plan: &SyncPlan) -> Option<CommitMessage> {
        self.plans.lock().expect("plans").push(plan.clone());
        match &self.confirm {
            Confirm::Default => Some(plan.default_message.clone()),
            Confirm::With(message) => Some(message.clone()),
            Confirm::Cancel => None,
        }
    }

    fn notify(&self, notice: &Notice) {
        self.notices.lock().expect("notices").push(notice.clone());
    }
}

pub struct Harness {
    pub store: Arc<MemoryContentStore>,
    pub credentials: Arc<MemoryCredentialStore>,
    pub orchestrator: SyncOrchestrator,
    pub state: StagingState,
}

pub fn entries(sources: &[&str]) -> Vec<AssetEntry> {
    sources
        .iter()
        .map(|src| AssetEntry::new(*src, default_title(src)))
        .collect()
}

impl Harness {
    /// Remote holds `committed` as its manifest plus every file it names.
    pub fn new(committed: Manifest) -> Self {
        Self::with_options(committed, SyncOptions::default())
    }

    pub fn with_options(committed: Manifest, options: SyncOptions) -> Self {
        let layout = RemoteLayout::default();
        let store = Arc::new(MemoryContentStore::new());
        store.seed(MANIFEST_PATH, manifest::encode(&committed).into_bytes());
        for (id, list) in committed.iter() {
            for entry in list {
                store.seed(&layout.remote_path(id, &entry.src), entry.src.clone().into_bytes());
            }
        }
        let credentials = Arc::new(MemoryCredentialStore::with_secret("github_token", TOKEN));
        let orchestrator = SyncOrchestrator::new(
            Arc::new(Arc::clone(&store)),
            Arc::clone(&credentials) as Arc<dyn CredentialStore>,
            options,
        );
        let state = StagingState::new(layout, committed);
        Self {
            store,
            credentials,
            orchestrator,
            state,
        }
    }

    pub fn remote_manifest(&self) -> Manifest {
        let bytes = self.store.object(MANIFEST_PATH).expect("manifest stored");
        let text = String::from_utf8(bytes.to_vec()).expect("utf-8 manifest");
        manifest::decode(&text).expect("remote manifest decodes")
    }
}
