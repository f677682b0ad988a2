//! Records owned by the catalog and the tag registry.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tagd_expr::{TagId, TagSet};
use time::OffsetDateTime;

/// Stable, never reused identifier of a stored file.
pub type FileId = u64;

/// Color given to tags created without one.
pub const DEFAULT_TAG_COLOR: &str = "#ffffff";

/// Whether a file is live or waiting in the trash for the sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrashState {
    #[default]
    Active,
    Trashed {
        #[serde(with = "time::serde::rfc3339")]
        since: OffsetDateTime,
    },
}

impl TrashState {
    pub fn is_trashed(&self) -> bool {
        matches!(self, Self::Trashed { .. })
    }

    /// When the file was moved to the trash, if it was.
    pub fn since(&self) -> Option<OffsetDateTime> {
        match self {
            Self::Active => None,
            Self::Trashed { since } => Some(*since),
        }
    }
}

/// Metadata of one stored file.
///
/// Callers always receive clones; the authoritative copy lives inside the
/// [`Catalog`](crate::Catalog).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    /// Display name, changed by renames.
    pub filename: String,
    /// Name the file was uploaded with.
    pub original_name: String,
    /// Payload size in bytes (plaintext).
    pub size: u64,
    pub mime: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: TagSet,
    #[serde(default)]
    pub trash: TrashState,
    /// Location of the resized preview inside the preview backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<PathBuf>,
}

impl FileRecord {
    /// Location of the payload inside the payload backend.
    pub fn payload_path(&self) -> PathBuf {
        payload_path(self.id)
    }

    pub fn is_trashed(&self) -> bool {
        self.trash.is_trashed()
    }
}

/// Payloads are keyed by file identifier alone.
pub fn payload_path(id: FileId) -> PathBuf {
    PathBuf::from(id.to_string())
}

/// Everything needed to create a [`FileRecord`] except the identifier, the
/// creation time and the trash state, which the catalog assigns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewFile {
    pub filename: String,
    pub original_name: String,
    pub size: u64,
    pub mime: String,
    pub description: String,
    pub tags: TagSet,
    pub preview: Option<PathBuf>,
}

impl NewFile {
    pub(crate) fn into_record(self, id: FileId, created_at: OffsetDateTime) -> FileRecord {
        FileRecord {
            id,
            filename: self.filename,
            original_name: self.original_name,
            size: self.size,
            mime: self.mime,
            created_at,
            description: self.description,
            tags: self.tags,
            trash: TrashState::Active,
            preview: self.preview,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub color: String,
}
