//! Download record types and status definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::CatalogError;
use crate::api::ItemDescriptor;

/// Outcome stored for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Media stored on disk.
    Success,
    /// Rejected by the type allow-list, or already present.
    Skipped,
    /// Retries exhausted or the item could not be written.
    Failed,
    /// Was `success`, but the file disappeared from disk.
    FileDeleted,
}

impl RecordStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::FileDeleted => "file_deleted",
        }
    }

    /// Every status, in display order.
    #[must_use]
    pub fn all() -> [Self; 4] {
        [Self::Success, Self::Skipped, Self::Failed, Self::FileDeleted]
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "skipped" => Ok(Self::Skipped),
            "failed" => Ok(Self::Failed),
            "file_deleted" => Ok(Self::FileDeleted),
            _ => Err(format!("invalid record status: {s}")),
        }
    }
}

/// One row of the `downloads` table.
#[derive(Debug, Clone, FromRow)]
pub struct DownloadRecord {
    /// Item id (primary key).
    pub item_id: String,
    /// Media URL.
    pub source_url: String,
    /// File name inside `folder_path`.
    pub local_filename: Option<String>,
    /// Directory the file was written to.
    pub folder_path: Option<String>,
    /// Stored as text, parsed via `status()`.
    #[sqlx(rename = "status")]
    pub status_str: String,
    /// Extension without the dot.
    pub file_extension: Option<String>,
    /// Bytes on disk.
    pub file_size: Option<i64>,
    /// Normalized rating `0..=6`.
    pub resolved_rating: i64,
    /// Width in pixels.
    pub width: Option<i64>,
    /// Height in pixels.
    pub height: Option<i64>,
    /// Like + heart + comment.
    pub reaction_total: i64,
    /// Content type could not be identified.
    pub needs_review: bool,
    /// Last error for failed items.
    pub error_message: Option<String>,
    /// Fetch attempts made.
    pub attempts: i64,
    /// Parent post id.
    pub post_id: Option<i64>,
    /// Author.
    pub username: Option<String>,
    /// When the row was last written (UTC, `SQLite` datetime format).
    pub recorded_at: String,
}

impl DownloadRecord {
    /// Parses the stored status.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidStatus`] for an unrecognized value.
    pub fn status(&self) -> Result<RecordStatus, CatalogError> {
        self.status_str
            .parse()
            .map_err(|_| CatalogError::InvalidStatus {
                status: self.status_str.clone(),
            })
    }

    /// Full path of the stored file, when both parts are known.
    #[must_use]
    pub fn file_path(&self) -> Option<PathBuf> {
        match (&self.folder_path, &self.local_filename) {
            (Some(folder), Some(name)) => Some(PathBuf::from(folder).join(name)),
            _ => None,
        }
    }
}

/// Values written by [`super::Catalog::upsert_record`].
#[derive(Debug, Clone)]
pub struct NewDownloadRecord<'a> {
    pub item_id: &'a str,
    pub source_url: &'a str,
    pub local_filename: Option<&'a str>,
    pub folder_path: Option<&'a str>,
    pub status: RecordStatus,
    pub file_extension: Option<&'a str>,
    pub file_size: Option<i64>,
    pub resolved_rating: u8,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub reaction_total: i64,
    pub needs_review: bool,
    pub error_message: Option<&'a str>,
    pub attempts: u32,
    pub post_id: Option<i64>,
    pub username: Option<&'a str>,
}

impl<'a> NewDownloadRecord<'a> {
    /// Record for `item` with `status`; file fields are left empty.
    #[must_use]
    pub fn for_item(item: &'a ItemDescriptor, status: RecordStatus) -> Self {
        Self {
            item_id: &item.id,
            source_url: item.source_url.as_deref().unwrap_or_default(),
            local_filename: None,
            folder_path: None,
            status,
            file_extension: None,
            file_size: None,
            resolved_rating: item.rating,
            width: item.width,
            height: item.height,
            reaction_total: i64::try_from(item.stats.reaction_total()).unwrap_or(i64::MAX),
            needs_review: false,
            error_message: None,
            attempts: 0,
            post_id: item.post_id,
            username: item.username.as_deref(),
        }
    }
}

/// Row counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub success: i64,
    pub skipped: i64,
    pub failed: i64,
    pub file_deleted: i64,
}

impl StatusCounts {
    /// Sum over every status.
    #[must_use]
    pub fn total(&self) -> i64 {
        self.success + self.skipped + self.failed + self.file_deleted
    }

    pub(crate) fn set(&mut self, status: RecordStatus, count: i64) {
        match status {
            RecordStatus::Success => self.success = count,
            RecordStatus::Skipped => self.skipped = count,
            RecordStatus::Failed => self.failed = count,
            RecordStatus::FileDeleted => self.file_deleted = count,
        }
    }
}
