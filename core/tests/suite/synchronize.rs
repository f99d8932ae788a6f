use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use folio_core::{
    CollectionId, CommitMessage, FolioError, Manifest, Notice, SyncOptions, SyncOutcome,
    SyncPhase, SyncReport,
};
use folio_keyring_store::CredentialStore;
use folio_store_client::{
    AccessToken, ContentStore, MemoryContentStore, StoreConnector, StoreError, StoredObject,
    VersionToken, delete_object,
};
use pretty_assertions::assert_eq;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{Confirm, Harness, IMAGES, MANIFEST_PATH, ScriptedOperator, TOKEN, VIDEOS, entries};

fn design(sources: &[&str]) -> Manifest {
    Manifest {
        design: entries(sources),
        ..Manifest::default()
    }
}

fn committed(outcome: Result<SyncOutcome, FolioError>) -> SyncReport {
    match outcome {
        Ok(SyncOutcome::Committed(report)) => report,
        other => panic!("expected a committed synchronization, got {other:?}"),
    }
}

#[tokio::test]
async fn commits_staged_changes_and_second_run_is_free() {
    let mut h = Harness::new(design(&["a.png", "b.png"]));
    h.state.remove(CollectionId::Design, 0).expect("remove a.png");
    h.state
        .stage_upload(CollectionId::Motion, "reel.mp4", b"mp4".to_vec())
        .expect("stage reel");
    h.state
        .set_title(CollectionId::Design, 0, "Brand refresh")
        .expect("retitle");
    let operator = ScriptedOperator::accepting();

    let report = committed(
        h.orchestrator
            .synchronize(&mut h.state, &operator, &CancellationToken::new())
            .await,
    );

    assert_eq!(report.deleted, vec![format!("{IMAGES}/a.png")]);
    assert_eq!(report.uploaded, vec![format!("{VIDEOS}/reel.mp4")]);
    assert_eq!(report.message.title, "Add 1 and delete 1 portfolio files");
    assert!(!h.store.contains(&format!("{IMAGES}/a.png")));
    assert_eq!(
        h.store.object(&format!("{VIDEOS}/reel.mp4")),
        Some(Bytes::from_static(b"mp4"))
    );
    assert_eq!(h.remote_manifest(), h.state.manifest());
    assert_eq!(h.state.committed(), &h.state.manifest());
    assert!(!h.state.is_dirty());
    assert!(h.state.pending_deletions().is_empty());
    assert_eq!(h.state.pending_upload_count(), 0);
    assert_eq!(h.orchestrator.phase(), SyncPhase::Idle);

    let messages = h.store.messages();
    assert_eq!(
        messages,
        vec![
            (
                format!("{IMAGES}/a.png"),
                format!("Delete {IMAGES}/a.png")
            ),
            (format!("{VIDEOS}/reel.mp4"), "Add reel.mp4".to_string()),
            (
                MANIFEST_PATH.to_string(),
                "Add 1 and delete 1 portfolio files".to_string()
            ),
        ]
    );

    h.store.clear_calls();
    let again = h
        .orchestrator
        .synchronize(&mut h.state, &operator, &CancellationToken::new())
        .await;

    assert_eq!(again.ok(), Some(SyncOutcome::NoChanges));
    assert_eq!(h.store.counts().total(), 0);
    assert_eq!(operator.plans().len(), 1);
}

#[tokio::test]
async fn one_failed_upload_leaves_everything_staged() {
    let mut h = Harness::new(design(&["a.png"]));
    h.state
        .stage_upload(CollectionId::Design, "x.png", b"x".to_vec())
        .expect("stage x");
    h.state
        .stage_upload(CollectionId::Design, "y.png", b"y".to_vec())
        .expect("stage y");
    let before = h.remote_manifest();
    h.store.fail_writes(
        &format!("{IMAGES}/x.png"),
        StoreError::Transient("connection reset".into()),
    );
    let operator = ScriptedOperator::accepting();

    let err = h
        .orchestrator
        .synchronize(&mut h.state, &operator, &CancellationToken::new())
        .await
        .expect_err("upload failure");

    match &err {
        FolioError::UploadFailed { total, failures } => {
            assert_eq!(*total, 2);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].path, format!("{IMAGES}/x.png"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(h.state.is_dirty());
    assert_eq!(h.state.pending_upload_count(), 2);
    assert_eq!(h.remote_manifest(), before);
    assert_eq!(h.orchestrator.phase(), SyncPhase::Failed);

    // y.png already landed; the retry must not write it a second time.
    h.store.clear_failures();
    h.store.clear_calls();
    committed(
        h.orchestrator
            .synchronize(&mut h.state, &operator, &CancellationToken::new())
            .await,
    );
    let written: Vec<String> = h.store.messages().into_iter().map(|(path, _)| path).collect();
    assert_eq!(
        written,
        vec![format!("{IMAGES}/x.png"), MANIFEST_PATH.to_string()]
    );
    assert_eq!(h.remote_manifest(), h.state.manifest());
}

#[tokio::test]
async fn failed_upload_among_three_keeps_the_deletion_set() {
    let mut h = Harness::new(design(&["a.png", "old.png"]));
    h.state.remove(CollectionId::Design, 1).expect("remove old.png");
    for name in ["x.png", "y.png", "z.png"] {
        h.state
            .stage_upload(CollectionId::Design, name, name.as_bytes().to_vec())
            .expect("stage");
    }
    let deletions_before = h.state.pending_deletions().clone();
    h.store.fail_writes(
        &format!("{IMAGES}/y.png"),
        StoreError::Api {
            status: 500,
            message: "boom".into(),
        },
    );

    let err = h
        .orchestrator
        .synchronize(&mut h.state, &ScriptedOperator::accepting(), &CancellationToken::new())
        .await;

    match err {
        Err(FolioError::UploadFailed { total, failures }) => {
            assert_eq!(total, 3);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].path, format!("{IMAGES}/y.png"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(h.state.pending_deletions(), &deletions_before);
    assert_eq!(h.state.pending_upload_count(), 3);
    assert!(h.state.is_dirty());
    assert_eq!(h.remote_manifest(), design(&["a.png", "old.png"]));
}

#[tokio::test]
async fn upload_conflict_is_retried_once() {
    let mut h = Harness::new(design(&["a.png"]));
    let path = format!("{IMAGES}/n.png");
    h.state
        .stage_upload(CollectionId::Design, "n.png", b"n".to_vec())
        .expect("stage");
    h.store.inject_conflicts(&path, 1);

    let report = committed(
        h.orchestrator
            .synchronize(&mut h.state, &ScriptedOperator::accepting(), &CancellationToken::new())
            .await,
    );

    assert_eq!(report.uploaded, vec![path.clone()]);
    assert_eq!(h.store.object(&path), Some(Bytes::from_static(b"n")));
}

#[tokio::test]
async fn persistent_upload_conflict_fails_the_attempt() {
    let mut h = Harness::new(design(&["a.png"]));
    let path = format!("{IMAGES}/n.png");
    h.state
        .stage_upload(CollectionId::Design, "n.png", b"n".to_vec())
        .expect("stage");
    h.store.inject_conflicts(&path, 2);

    let err = h
        .orchestrator
        .synchronize(&mut h.state, &ScriptedOperator::accepting(), &CancellationToken::new())
        .await;

    match err {
        Err(FolioError::UploadFailed { failures, .. }) => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].error.is_conflict(), "{:?}", failures[0].error);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(!h.store.contains(&path));
    assert_eq!(h.state.pending_upload_count(), 1);
}

#[tokio::test]
async fn deleting_an_already_missing_file_is_success() {
    let mut h = Harness::new(design(&["a.png", "gone.png"]));
    let path = format!("{IMAGES}/gone.png");
    delete_object(h.store.as_ref(), &path, "manual cleanup")
        .await
        .expect("remove out of band");
    h.state.remove(CollectionId::Design, 1).expect("remove gone.png");

    let report = committed(
        h.orchestrator
            .synchronize(&mut h.state, &ScriptedOperator::accepting(), &CancellationToken::new())
            .await,
    );

    assert_eq!(report.already_absent, vec![path]);
    assert!(report.deleted.is_empty());
    assert!(report.warnings.is_empty());
    assert!(h.state.pending_deletions().is_empty());
}

#[tokio::test]
async fn failed_delete_is_reported_as_warning() {
    let mut h = Harness::new(design(&["a.png", "b.png"]));
    let path = format!("{IMAGES}/b.png");
    h.store
        .fail_reads(&path, StoreError::Api { status: 500, message: "boom".into() });
    h.state.remove(CollectionId::Design, 1).expect("remove b.png");
    let operator = ScriptedOperator::accepting();

    let report = committed(
        h.orchestrator
            .synchronize(&mut h.state, &operator, &CancellationToken::new())
            .await,
    );

    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].path, path);
    assert!(matches!(
        operator.notices().as_slice(),
        [Notice::DeleteFailed { .. }]
    ));
    assert_eq!(h.remote_manifest(), design(&["a.png"]));
    assert!(h.state.pending_deletions().is_empty());
}

#[tokio::test]
async fn manifest_conflict_is_retried_once() {
    let mut h = Harness::new(design(&["a.png"]));
    h.store.inject_conflicts(MANIFEST_PATH, 1);
    h.state
        .set_title(CollectionId::Design, 0, "Alpha")
        .expect("retitle");

    let report = committed(
        h.orchestrator
            .synchronize(&mut h.state, &ScriptedOperator::accepting(), &CancellationToken::new())
            .await,
    );

    assert_eq!(report.message.title, "Update portfolio assets");
    assert_eq!(h.remote_manifest().design[0].title, "Alpha");
}

#[tokio::test]
async fn persistent_manifest_conflict_fails_without_reconciling() {
    let mut h = Harness::new(design(&["a.png"]));
    h.store.inject_conflicts(MANIFEST_PATH, 2);
    h.state
        .stage_upload(CollectionId::Design, "n.png", b"n".to_vec())
        .expect("stage");

    let err = h
        .orchestrator
        .synchronize(&mut h.state, &ScriptedOperator::accepting(), &CancellationToken::new())
        .await;

    assert!(matches!(err, Err(FolioError::Store(StoreError::Conflict { .. }))), "{err:?}");
    // Uploads are not rolled back, the manifest still lists the old state.
    assert!(h.store.contains(&format!("{IMAGES}/n.png")));
    assert_eq!(h.remote_manifest(), design(&["a.png"]));
    assert!(h.state.is_dirty());
    assert_eq!(h.state.pending_upload_count(), 1);
}

#[tokio::test]
async fn prompts_until_token_format_is_valid_and_saves_it() {
    let mut h = Harness::new(design(&[]));
    h.credentials.delete("github_token").expect("clear token");
    h.state
        .stage_upload(CollectionId::Slides, "deck.png", b"deck".to_vec())
        .expect("stage");
    let operator = ScriptedOperator::accepting().with_tokens(&["hunter2", "  ghp_fresh  "]);

    committed(
        h.orchestrator
            .synchronize(&mut h.state, &operator, &CancellationToken::new())
            .await,
    );

    assert_eq!(operator.credential_requests(), 2);
    assert!(matches!(
        operator.notices().as_slice(),
        [Notice::InvalidCredential(_)]
    ));
    assert_eq!(
        h.credentials.load("github_token").expect("load"),
        Some("ghp_fresh".to_string())
    );
}

#[tokio::test]
async fn declining_the_prompt_cancels_without_remote_calls() {
    let mut h = Harness::new(design(&["a.png"]));
    h.credentials.delete("github_token").expect("clear token");
    h.state.remove(CollectionId::Design, 0).expect("remove");

    let outcome = h
        .orchestrator
        .synchronize(&mut h.state, &ScriptedOperator::accepting(), &CancellationToken::new())
        .await;

    assert_eq!(outcome.ok(), Some(SyncOutcome::Cancelled));
    assert_eq!(h.store.counts().total(), 0);
    assert!(h.state.is_dirty());
}

#[tokio::test]
async fn rejected_credential_is_forgotten() {
    let mut h = Harness::new(design(&["a.png"]));
    h.store.reject_credentials(true);
    h.state
        .stage_upload(CollectionId::Design, "n.png", b"n".to_vec())
        .expect("stage");
    let operator = ScriptedOperator::accepting();

    let err = h
        .orchestrator
        .synchronize(&mut h.state, &operator, &CancellationToken::new())
        .await
        .expect_err("unauthorized");

    assert!(err.is_unauthorized(), "{err:?}");
    assert_eq!(h.credentials.load("github_token").expect("load"), None);
    assert!(operator.notices().contains(&Notice::CredentialForgotten));
    assert!(h.state.is_dirty());
    assert_eq!(h.orchestrator.phase(), SyncPhase::Failed);
}

#[tokio::test]
async fn cancelling_at_confirmation_mutates_nothing() {
    let mut h = Harness::new(design(&["a.png"]));
    h.state.remove(CollectionId::Design, 0).expect("remove");
    let operator = ScriptedOperator::new(Confirm::Cancel);

    let outcome = h
        .orchestrator
        .synchronize(&mut h.state, &operator, &CancellationToken::new())
        .await;

    assert_eq!(outcome.ok(), Some(SyncOutcome::Cancelled));
    assert_eq!(h.store.counts().mutations(), 0);
    assert!(h.store.contains(&format!("{IMAGES}/a.png")));
    assert_eq!(h.state.pending_deletions().len(), 1);
    assert_eq!(
        operator.plans()[0].preview_lines(),
        vec![
            format!("{IMAGES}/a.png (deleted)"),
            format!("{MANIFEST_PATH} (updated)")
        ]
    );
}

#[tokio::test]
async fn cancellation_token_stops_before_any_remote_call() {
    let mut h = Harness::new(design(&["a.png"]));
    h.state.remove(CollectionId::Design, 0).expect("remove");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let operator = ScriptedOperator::accepting();

    let outcome = h.orchestrator.synchronize(&mut h.state, &operator, &cancel).await;

    assert_eq!(outcome.ok(), Some(SyncOutcome::Cancelled));
    assert!(operator.plans().is_empty());
    assert_eq!(h.store.counts().total(), 0);
}

#[tokio::test]
async fn empty_commit_title_is_rejected() {
    let mut h = Harness::new(design(&["a.png"]));
    h.state.remove(CollectionId::Design, 0).expect("remove");
    let operator = ScriptedOperator::new(Confirm::With(CommitMessage::new("   ")));

    let err = h
        .orchestrator
        .synchronize(&mut h.state, &operator, &CancellationToken::new())
        .await;

    assert!(matches!(err, Err(FolioError::Validation(_))), "{err:?}");
    assert_eq!(h.store.counts().mutations(), 0);
    assert!(h.state.is_dirty());
}

#[tokio::test]
async fn custom_message_with_description_is_used_for_manifest() {
    let mut h = Harness::new(design(&["a.png"]));
    h.state.remove(CollectionId::Design, 0).expect("remove");
    let message = CommitMessage::new("Retire a").with_description("Client request");
    let operator = ScriptedOperator::new(Confirm::With(message));

    committed(
        h.orchestrator
            .synchronize(&mut h.state, &operator, &CancellationToken::new())
            .await,
    );

    let manifest_message = h
        .store
        .messages()
        .into_iter()
        .find(|(path, _)| path == MANIFEST_PATH)
        .map(|(_, message)| message);
    assert_eq!(manifest_message.as_deref(), Some("Retire a\n\nClient request"));
}

/// Operator that parks in confirmation until released.
struct ParkedOperator {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl folio_core::Operator for ParkedOperator {
    async fn request_credential(&self) -> Option<String> {
        None
    }

    async fn confirm(&self, _plan: &folio_core::SyncPlan) -> Option<CommitMessage> {
        self.entered.notify_one();
        self.release.notified().await;
        None
    }

    fn notify(&self, _notice: &Notice) {}
}

#[tokio::test]
async fn second_attempt_while_one_is_in_flight_is_refused() {
    let mut first = Harness::new(design(&["a.png"]));
    first.state.remove(CollectionId::Design, 0).expect("remove");
    let mut other = first.state.clone();
    let parked = ParkedOperator {
        entered: Notify::new(),
        release: Notify::new(),
    };
    let orchestrator = &first.orchestrator;
    let state = &mut first.state;
    let cancel = CancellationToken::new();
    let second_cancel = CancellationToken::new();
    let second_operator = ScriptedOperator::accepting();

    let (outcome, refused) = tokio::join!(
        orchestrator.synchronize(state, &parked, &cancel),
        async {
            parked.entered.notified().await;
            let refused = orchestrator
                .synchronize(&mut other, &second_operator, &second_cancel)
                .await;
            parked.release.notify_one();
            refused
        }
    );

    assert!(matches!(refused, Err(FolioError::SyncInProgress)));
    assert_eq!(outcome.ok(), Some(SyncOutcome::Cancelled));

    let after = orchestrator
        .synchronize(&mut other, &second_operator, &second_cancel)
        .await;
    assert!(!matches!(after, Err(FolioError::SyncInProgress)));
}

/// Delegates to the in-memory store after a fixed delay.
struct SlowStore {
    inner: Arc<MemoryContentStore>,
    delay: Duration,
}

#[async_trait]
impl ContentStore for SlowStore {
    async fn read(&self, path: &str) -> folio_store_client::Result<StoredObject> {
        tokio::time::sleep(self.delay).await;
        self.inner.read(path).await
    }

    async fn write(
        &self,
        path: &str,
        content: Bytes,
        expected: Option<&VersionToken>,
        message: &str,
    ) -> folio_store_client::Result<VersionToken> {
        tokio::time::sleep(self.delay).await;
        self.inner.write(path, content, expected, message).await
    }

    async fn delete(
        &self,
        path: &str,
        version: &VersionToken,
        message: &str,
    ) -> folio_store_client::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete(path, version, message).await
    }
}

struct SlowConnector(Arc<SlowStore>);

impl StoreConnector for SlowConnector {
    fn connect(&self, _token: &AccessToken) -> folio_store_client::Result<Arc<dyn ContentStore>> {
        Ok(Arc::clone(&self.0) as Arc<dyn ContentStore>)
    }
}

#[tokio::test(start_paused = true)]
async fn attempt_timeout_fails_the_attempt() {
    let mut h = Harness::new(design(&["a.png"]));
    h.state
        .stage_upload(CollectionId::Design, "n.png", b"n".to_vec())
        .expect("stage");
    let slow = Arc::new(SlowStore {
        inner: Arc::clone(&h.store),
        delay: Duration::from_secs(60),
    });
    let credentials =
        folio_keyring_store::MemoryCredentialStore::with_secret("github_token", TOKEN);
    let orchestrator = folio_core::SyncOrchestrator::new(
        Arc::new(SlowConnector(slow)),
        Arc::new(credentials) as Arc<dyn CredentialStore>,
        SyncOptions {
            attempt_timeout: Some(Duration::from_secs(5)),
            ..SyncOptions::default()
        },
    );

    let err = orchestrator
        .synchronize(&mut h.state, &ScriptedOperator::accepting(), &CancellationToken::new())
        .await;

    assert!(matches!(err, Err(FolioError::Timeout(_))), "{err:?}");
    assert!(h.state.is_dirty());
    assert_eq!(h.remote_manifest(), design(&["a.png"]));
}
