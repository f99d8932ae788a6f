//! Offline bundle for publishing staged changes by hand.
//!
//! Mirrors the remote layout under a local directory: every staged upload at
//! its remote path, the encoded manifest, and a plain-text instruction sheet.
//! Staging state is left untouched; the changes stay pending.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{FolioError, Result};
use crate::manifest;
use crate::staging::StagingState;

pub const INSTRUCTIONS_FILE: &str = "UPLOAD_INSTRUCTIONS.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub files: Vec<PathBuf>,
    pub manifest: PathBuf,
    pub instructions: PathBuf,
}

pub async fn export_bundle(state: &StagingState, out_dir: &Path) -> Result<ExportSummary> {
    let diff = state.diff();
    let layout = state.layout();

    let mut files = Vec::with_capacity(diff.uploads.len());
    let mut by_directory: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for upload in &diff.uploads {
        let target = out_dir.join(&upload.remote_path);
        write_file(&target, &upload.content).await?;
        by_directory
            .entry(layout.directory(upload.collection))
            .or_default()
            .push(&upload.source);
        files.push(target);
    }

    let manifest_target = out_dir.join(layout.manifest_path.trim_start_matches('/'));
    write_file(&manifest_target, manifest::encode(&diff.manifest).as_bytes()).await?;

    let instructions_target = out_dir.join(INSTRUCTIONS_FILE);
    let text = instructions(&by_directory, &layout.manifest_path, &diff.deletions);
    write_file(&instructions_target, text.as_bytes()).await?;

    tracing::info!(
        dir = %out_dir.display(),
        files = files.len(),
        "exported offline bundle"
    );
    Ok(ExportSummary {
        files,
        manifest: manifest_target,
        instructions: instructions_target,
    })
}

async fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    let io_error = |source: io::Error| FolioError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }
    tokio::fs::write(path, content).await.map_err(io_error)
}

fn instructions(
    by_directory: &BTreeMap<&str, Vec<&str>>,
    manifest_path: &str,
    deletions: &[String],
) -> String {
    let mut out = String::from("UPLOAD INSTRUCTIONS\n===================\n\n");
    if by_directory.is_empty() {
        out.push_str("No new files to upload.\n\n");
    } else {
        out.push_str("Upload these files to the repository:\n\n");
        for (directory, names) in by_directory {
            out.push_str(&format!("{directory}/\n"));
            for name in names {
                out.push_str(&format!("   - {name}\n"));
            }
            out.push('\n');
        }
    }

    if !deletions.is_empty() {
        out.push_str("Remove these files from the repository:\n\n");
        for path in deletions {
            out.push_str(&format!("   - {path}\n"));
        }
        out.push('\n');
    }

    out.push_str("MANIFEST\n========\n");
    out.push_str(&format!(
        "Replace {manifest_path} in the repository with the exported copy.\n\n"
    ));
    out.push_str(&format!("Generated: {}\n", chrono::Utc::now().to_rfc3339()));
    out
}
