//! Catalog of per-item download records.
//!
//! `SQLite`-backed store read by the browsing surface. The engine writes one
//! row per terminal outcome (upserting on the item id); reconciliation later
//! moves `success` rows whose files vanished to `file_deleted`. Rows are never
//! deleted.
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::Database;
//! use harvester_core::catalog::{Catalog, RecordStatus};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("download_history.db")).await?;
//! let catalog = Catalog::new(db);
//! let moved = catalog.reconcile().await?;
//! let stored = catalog.count_by_status(RecordStatus::Success).await?;
//! println!("{moved} files missing, {stored} on disk");
//! # Ok(())
//! # }
//! ```

mod error;
mod record;
mod repository;

pub use error::{CatalogDbErrorKind, CatalogError};
pub use record::{DownloadRecord, NewDownloadRecord, RecordStatus, StatusCounts};
pub use repository::RecordRepository;

use sqlx::Row;
use tracing::{debug, info, instrument, warn};

use crate::api::GenerationMeta;
use crate::db::Database;

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Returns `Ok(())` if at least one row was affected; otherwise [`CatalogError::RecordNotFound`].
fn check_affected(item_id: &str, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(CatalogError::RecordNotFound(item_id.to_string()))
    } else {
        Ok(())
    }
}

/// Download record store.
#[derive(Debug, Clone)]
pub struct Catalog {
    db: Database,
}

impl Catalog {
    /// Creates a catalog over an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts or replaces the record for `record.item_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the write fails.
    #[instrument(skip(self, record), fields(item_id = %record.item_id, status = %record.status))]
    pub async fn upsert_record(&self, record: &NewDownloadRecord<'_>) -> Result<()> {
        sqlx::query(
            r"INSERT INTO downloads (
                item_id, source_url, local_filename, folder_path, status,
                file_extension, file_size, resolved_rating, width, height,
                reaction_total, needs_review, error_message, attempts, post_id,
                username, recorded_at
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
              ON CONFLICT(item_id) DO UPDATE SET
                source_url = excluded.source_url,
                local_filename = excluded.local_filename,
                folder_path = excluded.folder_path,
                status = excluded.status,
                file_extension = excluded.file_extension,
                file_size = excluded.file_size,
                resolved_rating = excluded.resolved_rating,
                width = excluded.width,
                height = excluded.height,
                reaction_total = excluded.reaction_total,
                needs_review = excluded.needs_review,
                error_message = excluded.error_message,
                attempts = excluded.attempts,
                post_id = excluded.post_id,
                username = excluded.username,
                recorded_at = excluded.recorded_at",
        )
        .bind(record.item_id)
        .bind(record.source_url)
        .bind(record.local_filename)
        .bind(record.folder_path)
        .bind(record.status.as_str())
        .bind(record.file_extension)
        .bind(record.file_size)
        .bind(i64::from(record.resolved_rating))
        .bind(record.width.map(i64::from))
        .bind(record.height.map(i64::from))
        .bind(record.reaction_total)
        .bind(record.needs_review)
        .bind(record.error_message)
        .bind(i64::from(record.attempts))
        .bind(record.post_id)
        .bind(record.username)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Inserts `record` only if the item has no row yet.
    ///
    /// Returns true when a row was written.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the write fails.
    #[instrument(skip(self, record), fields(item_id = %record.item_id))]
    pub async fn insert_if_absent(&self, record: &NewDownloadRecord<'_>) -> Result<bool> {
        if self.get(record.item_id).await?.is_some() {
            return Ok(false);
        }
        self.upsert_record(record).await?;
        Ok(true)
    }

    /// Replaces the generation parameters stored for `item_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the write fails (including when
    /// the item has no download record).
    #[instrument(skip(self, meta))]
    pub async fn store_generation_params(&self, item_id: &str, meta: &GenerationMeta) -> Result<()> {
        let raw = serde_json::to_string(&meta.raw).ok();
        sqlx::query(
            r"INSERT OR REPLACE INTO generation_params (
                item_id, prompt, negative_prompt, model_name, model_hash,
                sampler_name, steps, cfg_scale, seed, clip_skip, raw_params
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(item_id)
        .bind(meta.prompt.as_deref())
        .bind(meta.negative_prompt.as_deref())
        .bind(meta.model.as_deref())
        .bind(meta.model_hash.as_deref())
        .bind(meta.sampler.as_deref())
        .bind(meta.steps)
        .bind(meta.cfg_scale)
        .bind(meta.seed)
        .bind(meta.clip_skip)
        .bind(raw)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Links `tags` to `item_id`, creating tag rows as needed.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if any write fails; the whole set is
    /// written in one transaction.
    #[instrument(skip(self, tags), fields(count = tags.len()))]
    pub async fn store_tags(&self, item_id: &str, tags: &[String]) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }

        let mut tx = self.db.pool().begin().await?;
        for tag in tags {
            sqlx::query("INSERT OR IGNORE INTO tags (tag_name) VALUES (?)")
                .bind(tag)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                r"INSERT OR IGNORE INTO image_tags (item_id, tag_id)
                  SELECT ?, tag_id FROM tags WHERE tag_name = ?",
            )
            .bind(item_id)
            .bind(tag)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Tag names linked to `item_id`, alphabetically.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails.
    pub async fn tags_for(&self, item_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r"SELECT t.tag_name FROM tags t
              JOIN image_tags it ON it.tag_id = t.tag_id
              WHERE it.item_id = ?
              ORDER BY t.tag_name",
        )
        .bind(item_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(|row| row.get("tag_name")).collect())
    }

    /// Fetches one record.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails.
    pub async fn get(&self, item_id: &str) -> Result<Option<DownloadRecord>> {
        let record = sqlx::query_as::<_, DownloadRecord>("SELECT * FROM downloads WHERE item_id = ?")
            .bind(item_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(record)
    }

    /// Number of records with `status`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails.
    pub async fn count_by_status(&self, status: RecordStatus) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM downloads WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.get("count"))
    }

    /// Records with `status`, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails.
    pub async fn list_by_status(&self, status: RecordStatus) -> Result<Vec<DownloadRecord>> {
        let records = sqlx::query_as::<_, DownloadRecord>(
            "SELECT * FROM downloads WHERE status = ? ORDER BY recorded_at DESC, item_id",
        )
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await?;
        Ok(records)
    }

    /// Row counts for every status.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if the query fails, or
    /// [`CatalogError::InvalidStatus`] if an unknown status is stored.
    pub async fn status_counts(&self) -> Result<StatusCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM downloads GROUP BY status")
            .fetch_all(self.db.pool())
            .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.get("status");
            let status = status
                .parse::<RecordStatus>()
                .map_err(|_| CatalogError::InvalidStatus { status })?;
            counts.set(status, row.get("count"));
        }
        Ok(counts)
    }

    /// Moves a `success` record to `file_deleted`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::RecordNotFound`] if no `success` row exists for
    /// the item, or [`CatalogError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn mark_file_deleted(&self, item_id: &str) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE downloads
              SET status = ?, recorded_at = datetime('now')
              WHERE item_id = ? AND status = ?",
        )
        .bind(RecordStatus::FileDeleted.as_str())
        .bind(item_id)
        .bind(RecordStatus::Success.as_str())
        .execute(self.db.pool())
        .await?;

        check_affected(item_id, result.rows_affected())
    }

    /// Checks every `success` record against the filesystem and moves those
    /// whose file is gone to `file_deleted`.
    ///
    /// Returns the number of records moved. Neither the record nor the ledger
    /// entry is removed, so the item is not fetched again.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Database`] if reading or updating fails.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<usize> {
        let rows = sqlx::query(
            "SELECT item_id, folder_path, local_filename FROM downloads WHERE status = ?",
        )
        .bind(RecordStatus::Success.as_str())
        .fetch_all(self.db.pool())
        .await?;

        let checked = rows.len();
        let mut moved = 0;
        for row in rows {
            let item_id: String = row.get("item_id");
            let folder: Option<String> = row.get("folder_path");
            let name: Option<String> = row.get("local_filename");
            let (Some(folder), Some(name)) = (folder, name) else {
                debug!(item_id = %item_id, "success record without a file path");
                continue;
            };

            let path = std::path::Path::new(&folder).join(&name);
            match tokio::fs::try_exists(&path).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(item_id = %item_id, path = %path.display(), "file missing");
                    self.mark_file_deleted(&item_id).await?;
                    moved += 1;
                }
                Err(e) => {
                    warn!(item_id = %item_id, path = %path.display(), error = %e, "cannot check file, leaving record");
                }
            }
        }

        info!(checked, moved, "reconciliation complete");
        Ok(moved)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::api::ItemDescriptor;

    async fn catalog() -> Catalog {
        Catalog::new(Database::new_in_memory().await.unwrap())
    }

    fn item(id: u64) -> ItemDescriptor {
        ItemDescriptor::from_value(json!({
            "id": id,
            "url": format!("https://cdn/{id}.png"),
            "width": 512,
            "height": 768,
            "nsfwLevel": 2,
            "stats": {"likeCount": 4, "commentCount": 1}
        }))
        .unwrap()
    }

    // ==================== Record Tests ====================

    #[tokio::test]
    async fn test_upsert_inserts_then_updates() {
        let catalog = catalog().await;
        let item = item(1);

        let mut record = NewDownloadRecord::for_item(&item, RecordStatus::Failed);
        record.error_message = Some("HTTP 503");
        record.attempts = 3;
        catalog.upsert_record(&record).await.unwrap();

        let stored = catalog.get("1").await.unwrap().unwrap();
        assert_eq!(stored.status().unwrap(), RecordStatus::Failed);
        assert_eq!(stored.attempts, 3);
        assert_eq!(stored.resolved_rating, 2);
        assert_eq!(stored.reaction_total, 5);
        assert_eq!(stored.height, Some(768));

        let mut record = NewDownloadRecord::for_item(&item, RecordStatus::Success);
        record.local_filename = Some("civitai_1.png");
        record.folder_path = Some("/tmp/out/Mature");
        catalog.upsert_record(&record).await.unwrap();

        let stored = catalog.get("1").await.unwrap().unwrap();
        assert_eq!(stored.status().unwrap(), RecordStatus::Success);
        assert_eq!(stored.error_message, None);
        assert_eq!(
            stored.file_path().unwrap(),
            std::path::PathBuf::from("/tmp/out/Mature/civitai_1.png")
        );
        assert_eq!(catalog.status_counts().await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_existing_row() {
        let catalog = catalog().await;
        let item = item(2);
        let mut first = NewDownloadRecord::for_item(&item, RecordStatus::Success);
        first.file_size = Some(10);

        assert!(catalog.insert_if_absent(&first).await.unwrap());
        let mut second = first.clone();
        second.file_size = Some(99);
        assert!(!catalog.insert_if_absent(&second).await.unwrap());
        assert_eq!(catalog.get("2").await.unwrap().unwrap().file_size, Some(10));
    }

    #[tokio::test]
    async fn test_counts_and_listing() {
        let catalog = catalog().await;
        let items: Vec<_> = (1..=4).map(item).collect();
        let statuses = [
            RecordStatus::Success,
            RecordStatus::Success,
            RecordStatus::Skipped,
            RecordStatus::Failed,
        ];
        for (item, status) in items.iter().zip(statuses) {
            catalog
                .upsert_record(&NewDownloadRecord::for_item(item, status))
                .await
                .unwrap();
        }

        let counts = catalog.status_counts().await.unwrap();
        assert_eq!(counts.success, 2);
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.file_deleted, 0);
        assert_eq!(catalog.count_by_status(RecordStatus::Success).await.unwrap(), 2);
        assert_eq!(
            catalog
                .list_by_status(RecordStatus::Failed)
                .await
                .unwrap()
                .iter()
                .map(|r| r.item_id.as_str())
                .collect::<Vec<_>>(),
            vec!["4"]
        );
    }

    // ==================== Extras Tests ====================

    #[tokio::test]
    async fn test_generation_params_and_tags() {
        let catalog = catalog().await;
        let item = item(5);
        catalog
            .upsert_record(&NewDownloadRecord::for_item(&item, RecordStatus::Success))
            .await
            .unwrap();

        let meta = GenerationMeta {
            prompt: Some("a cat".into()),
            steps: Some(20),
            cfg_scale: Some(7.0),
            raw: json!({"prompt": "a cat"}),
            ..GenerationMeta::default()
        };
        catalog.store_generation_params("5", &meta).await.unwrap();
        catalog.store_generation_params("5", &meta).await.unwrap();

        let row = sqlx::query("SELECT prompt, steps FROM generation_params WHERE item_id = '5'")
            .fetch_one(catalog.db.pool())
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("prompt"), "a cat");
        assert_eq!(row.get::<i64, _>("steps"), 20);

        let tags = vec!["cat".to_string(), "anime".to_string()];
        catalog.store_tags("5", &tags).await.unwrap();
        catalog.store_tags("5", &tags).await.unwrap();
        assert_eq!(catalog.tags_for("5").await.unwrap(), vec!["anime", "cat"]);
    }

    // ==================== Reconciliation Tests ====================

    #[tokio::test]
    async fn test_reconcile_marks_missing_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().to_string_lossy().to_string();
        std::fs::write(dir.path().join("civitai_1.png"), b"x").unwrap();

        let catalog = catalog().await;
        let (present, missing, failed) = (item(1), item(2), item(3));
        for (item, name, status) in [
            (&present, "civitai_1.png", RecordStatus::Success),
            (&missing, "civitai_2.png", RecordStatus::Success),
            (&failed, "civitai_3.png", RecordStatus::Failed),
        ] {
            let mut record = NewDownloadRecord::for_item(item, status);
            record.local_filename = Some(name);
            record.folder_path = Some(&folder);
            catalog.upsert_record(&record).await.unwrap();
        }

        assert_eq!(catalog.reconcile().await.unwrap(), 1);
        let status = |id: &'static str| {
            let catalog = catalog.clone();
            async move { catalog.get(id).await.unwrap().unwrap().status().unwrap() }
        };
        assert_eq!(status("1").await, RecordStatus::Success);
        assert_eq!(status("2").await, RecordStatus::FileDeleted);
        assert_eq!(status("3").await, RecordStatus::Failed);

        // Second pass finds nothing new.
        assert_eq!(catalog.reconcile().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_file_deleted_requires_success_row() {
        let catalog = catalog().await;
        let err = catalog.mark_file_deleted("nope").await.unwrap_err();
        assert!(matches!(err, CatalogError::RecordNotFound(_)));
    }
}
