//! Core domain types for docflow documents.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// MIME type of the canonical format every document is normalized to.
pub const CANONICAL_MIME: &str = "application/pdf";

/// Generate a new time-sortable identifier (UUID v7).
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Format a timestamp the way every table stores it.
///
/// Fixed precision and a `Z` suffix keep the text lexicographically ordered,
/// so `created_at < ?` comparisons work in SQL.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// DocumentStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a document.
///
/// Transitions are monotone: `Uploading → Processing → Ready | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    /// Row created, content not yet validated.
    Uploading,
    /// Validation, normalization and storage in flight.
    Processing,
    /// Canonical bytes stored; terminal.
    Ready,
    /// Some stage failed; terminal.
    Failed,
}

impl DocumentStatus {
    /// Column value used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "UPLOADING",
            Self::Processing => "PROCESSING",
            Self::Ready => "READY",
            Self::Failed => "FAILED",
        }
    }

    /// READY and FAILED never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "UPLOADING" => Ok(Self::Uploading),
            "PROCESSING" => Ok(Self::Processing),
            "READY" => Ok(Self::Ready),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown document status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// An ingested document, as stored in the `documents` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Opaque identifier (UUID v7).
    pub id: String,
    /// Owning user.
    pub owner_id: String,
    /// Display name derived from the uploaded filename.
    pub name: String,
    /// Blob key. Set if and only if `status` is READY.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,
    /// Raw upload size until READY, stored canonical size afterwards.
    pub size_bytes: u64,
    /// Optional folder reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    /// Lifecycle state.
    pub status: DocumentStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// The one derived summary of a READY document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document_id: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

/// A user folder grouping documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Time-limited read access to a document for a user other than its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentShare {
    pub document_id: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl DocumentShare {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Partial update applied by `DocumentService::update`.
///
/// Status is deliberately absent: only the status tracker moves it.
#[derive(Debug, Clone, Default)]
pub struct DocumentUpdate {
    /// New display name.
    pub name: Option<String>,
    /// `Some(None)` detaches the document from its folder.
    pub folder_id: Option<Option<String>>,
}

impl DocumentUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.folder_id.is_none()
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Sort order for collection queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewestFirst => "newest",
            Self::OldestFirst => "oldest",
        }
    }
}

/// Filter and paging parameters shared by list and search queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentQuery {
    pub folder_id: Option<String>,
    pub limit: u32,
    pub offset: u32,
    pub order: SortOrder,
}

impl Default for DocumentQuery {
    fn default() -> Self {
        Self {
            folder_id: None,
            limit: 20,
            offset: 0,
            order: SortOrder::default(),
        }
    }
}
