//! Mapping from collections to remote locations.

use serde::{Deserialize, Serialize};

use crate::asset::CollectionId;
use crate::error::{FolioError, Result};

/// Where each collection and the manifest live in the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLayout {
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,

    #[serde(default = "default_design_dir")]
    pub design_dir: String,

    #[serde(default = "default_motion_dir")]
    pub motion_dir: String,

    /// Slide exports are images and share the design directory by default.
    #[serde(default = "default_design_dir")]
    pub slides_dir: String,
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self {
            manifest_path: default_manifest_path(),
            design_dir: default_design_dir(),
            motion_dir: default_motion_dir(),
            slides_dir: default_design_dir(),
        }
    }
}

impl RemoteLayout {
    pub fn directory(&self, collection: CollectionId) -> &str {
        let dir = match collection {
            CollectionId::Design => &self.design_dir,
            CollectionId::Motion => &self.motion_dir,
            CollectionId::Slides => &self.slides_dir,
        };
        dir.trim_matches('/')
    }

    pub fn remote_path(&self, collection: CollectionId, source: &str) -> String {
        format!("{}/{source}", self.directory(collection))
    }

    pub fn validate(&self) -> Result<()> {
        if self.manifest_path.trim_matches('/').is_empty() {
            return Err(FolioError::Validation(
                "layout.manifest_path must not be empty".to_string(),
            ));
        }
        for id in CollectionId::ALL {
            if self.directory(id).is_empty() {
                return Err(FolioError::Validation(format!(
                    "layout directory for {id} must not be empty"
                )));
            }
        }
        Ok(())
    }
}

fn default_manifest_path() -> String {
    "assestsName.js".to_string()
}

fn default_design_dir() -> String {
    "assets/img/portfolio/images".to_string()
}

fn default_motion_dir() -> String {
    "assets/img/portfolio/videos".to_string()
}
