//! Media types accepted for staging.

use crate::asset::CollectionId;
use crate::error::{FolioError, Result};

pub const ALLOWED_MIME_TYPES: [&str; 6] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "video/mp4",
    "video/webm",
];

/// Resolves the MIME type of `file_name` from its extension and checks it
/// against [`ALLOWED_MIME_TYPES`].
pub fn check_media_type(file_name: &str) -> Result<&'static str> {
    let guessed = mime_guess::from_path(file_name).first_raw();
    guessed
        .and_then(|mime| ALLOWED_MIME_TYPES.iter().copied().find(|allowed| *allowed == mime))
        .ok_or_else(|| {
            FolioError::Validation(format!(
                "{file_name}: unsupported file type {}; allowed: {}",
                guessed.unwrap_or("unknown"),
                ALLOWED_MIME_TYPES.join(", ")
            ))
        })
}

/// Collection a file most likely belongs to, judged by its media type.
pub fn suggested_collection(mime: &str) -> CollectionId {
    if mime.starts_with("video/") {
        CollectionId::Motion
    } else {
        CollectionId::Design
    }
}
