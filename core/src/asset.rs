//! Asset records and the three fixed collections.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// One of the three disjoint collections, in manifest order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CollectionId {
    Design,
    Motion,
    Slides,
}

impl CollectionId {
    pub const ALL: [CollectionId; 3] = [
        CollectionId::Design,
        CollectionId::Motion,
        CollectionId::Slides,
    ];

    /// Name of the list declaration in the manifest text.
    pub fn manifest_identifier(self) -> &'static str {
        match self {
            CollectionId::Design => "PhotoshopFiles",
            CollectionId::Motion => "videoFiles",
            CollectionId::Slides => "PPTFiles",
        }
    }

    pub fn from_manifest_identifier(identifier: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|id| id.manifest_identifier() == identifier)
    }
}

/// Binary payload staged for upload. Owned by exactly one record.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingContent {
    bytes: Bytes,
}

impl PendingContent {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for PendingContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PendingContent({} bytes)", self.bytes.len())
    }
}

/// The persisted part of a record: what the manifest stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub src: String,
    pub title: String,
}

impl AssetEntry {
    pub fn new(src: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            title: title.into(),
        }
    }
}

/// A record in the working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    pub source: String,
    pub title: String,
    pending: Option<PendingContent>,
}

impl AssetRecord {
    /// A record that already exists in the store.
    pub fn committed(source: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            title: title.into(),
            pending: None,
        }
    }

    /// A not-yet-committed upload.
    pub fn staged(
        source: impl Into<String>,
        title: impl Into<String>,
        content: PendingContent,
    ) -> Self {
        Self {
            source: source.into(),
            title: title.into(),
            pending: Some(content),
        }
    }

    pub fn pending(&self) -> Option<&PendingContent> {
        self.pending.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub(crate) fn take_pending(&mut self) -> Option<PendingContent> {
        self.pending.take()
    }

    pub fn entry(&self) -> AssetEntry {
        AssetEntry::new(self.source.clone(), self.title.clone())
    }
}

impl From<AssetEntry> for AssetRecord {
    fn from(entry: AssetEntry) -> Self {
        AssetRecord::committed(entry.src, entry.title)
    }
}

/// Per-collection storage, always iterated in manifest order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collections<T> {
    pub design: Vec<T>,
    pub motion: Vec<T>,
    pub slides: Vec<T>,
}

impl<T> Default for Collections<T> {
    fn default() -> Self {
        Self {
            design: Vec::new(),
            motion: Vec::new(),
            slides: Vec::new(),
        }
    }
}

impl<T> Collections<T> {
    pub fn get(&self, id: CollectionId) -> &Vec<T> {
        match id {
            CollectionId::Design => &self.design,
            CollectionId::Motion => &self.motion,
            CollectionId::Slides => &self.slides,
        }
    }

    pub fn get_mut(&mut self, id: CollectionId) -> &mut Vec<T> {
        match id {
            CollectionId::Design => &mut self.design,
            CollectionId::Motion => &mut self.motion,
            CollectionId::Slides => &mut self.slides,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (CollectionId, &Vec<T>)> {
        CollectionId::ALL.into_iter().map(move |id| (id, self.get(id)))
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Collections<U> {
        Collections {
            design: self.design.iter().map(&mut f).collect(),
            motion: self.motion.iter().map(&mut f).collect(),
            slides: self.slides.iter().map(&mut f).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.design.len() + self.motion.len() + self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Committed `{src, title}` state of all three collections.
pub type Manifest = Collections<AssetEntry>;

/// Title shown for a freshly added file: the name without its last extension,
/// first character upper-cased.
pub fn default_title(file_name: &str) -> String {
    let stem = match file_name.rfind('.') {
        Some(dot) if dot + 1 < file_name.len() => &file_name[..dot],
        _ => file_name,
    };
    let mut chars = stem.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Splits `name` into stem and extension (including the dot). Leading-dot
/// names and names without a dot have no extension.
pub(crate) fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    }
}
