use folio_core::media::check_media_type;
use folio_core::{CollectionId, FolioError, RemoteLayout, StagingState, export_bundle, manifest};
use pretty_assertions::assert_eq;

use super::{IMAGES, MANIFEST_PATH, VIDEOS};

const REMOTE_MANIFEST: &str = r#"const PhotoshopFiles = [
  { src: "poster.jpg", title: "Poster" }
];

const videoFiles = [

];

const PPTFiles = [
  { src: "pitch.png", title: "Pitch" }
];"#;

#[tokio::test]
async fn bundle_mirrors_remote_layout() {
    let (mut state, parse_error) =
        StagingState::from_manifest_text(RemoteLayout::default(), REMOTE_MANIFEST);
    assert_eq!(parse_error, None);

    for (collection, name, bytes) in [
        (CollectionId::Motion, "teaser.webm", b"webm".as_slice()),
        (CollectionId::Design, "poster.jpg", b"jpg2".as_slice()),
    ] {
        check_media_type(name).expect("allowed media");
        state.stage_upload(collection, name, bytes.to_vec()).expect("stage");
    }
    state.remove(CollectionId::Slides, 0).expect("remove pitch");
    let renamed = state.collection(CollectionId::Design)[0].source.clone();
    assert_ne!(renamed, "poster.jpg");

    let out = tempfile::tempdir().expect("tempdir");
    let summary = export_bundle(&state, out.path()).await.expect("export");

    assert_eq!(summary.files.len(), 2);
    assert_eq!(
        std::fs::read(out.path().join(format!("{VIDEOS}/teaser.webm"))).expect("video"),
        b"webm"
    );
    assert_eq!(
        std::fs::read(out.path().join(format!("{IMAGES}/{renamed}"))).expect("image"),
        b"jpg2"
    );

    let text = std::fs::read_to_string(out.path().join(MANIFEST_PATH)).expect("manifest");
    assert_eq!(manifest::decode(&text), Ok(state.manifest()));

    let sheet = std::fs::read_to_string(&summary.instructions).expect("instructions");
    assert!(sheet.contains(&format!("{IMAGES}/pitch.png")), "{sheet}");
}

#[test]
fn unsupported_media_is_rejected_before_staging() {
    let err = check_media_type("notes.pdf");
    assert!(matches!(err, Err(FolioError::Validation(_))));
}
