//! Repository seam for download records.
//!
//! The worker pool writes through this trait so tests can observe or
//! replace the store without a database.

use async_trait::async_trait;

use super::{Catalog, NewDownloadRecord, RecordStatus, Result};
use crate::api::GenerationMeta;

/// Data-access contract used by the engine.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Inserts or replaces a record.
    async fn upsert_record(&self, record: &NewDownloadRecord<'_>) -> Result<()>;

    /// Inserts a record unless one exists; returns true when written.
    async fn insert_if_absent(&self, record: &NewDownloadRecord<'_>) -> Result<bool>;

    /// Stores generation parameters for a recorded item.
    async fn store_generation_params(&self, item_id: &str, meta: &GenerationMeta) -> Result<()>;

    /// Links tags to a recorded item.
    async fn store_tags(&self, item_id: &str, tags: &[String]) -> Result<()>;

    /// Counts records in a status.
    async fn count_by_status(&self, status: RecordStatus) -> Result<i64>;

    /// Moves records whose files vanished to `file_deleted`.
    async fn reconcile(&self) -> Result<usize>;
}

#[async_trait]
impl RecordRepository for Catalog {
    async fn upsert_record(&self, record: &NewDownloadRecord<'_>) -> Result<()> {
        Catalog::upsert_record(self, record).await
    }

    async fn insert_if_absent(&self, record: &NewDownloadRecord<'_>) -> Result<bool> {
        Catalog::insert_if_absent(self, record).await
    }

    async fn store_generation_params(&self, item_id: &str, meta: &GenerationMeta) -> Result<()> {
        Catalog::store_generation_params(self, item_id, meta).await
    }

    async fn store_tags(&self, item_id: &str, tags: &[String]) -> Result<()> {
        Catalog::store_tags(self, item_id, tags).await
    }

    async fn count_by_status(&self, status: RecordStatus) -> Result<i64> {
        Catalog::count_by_status(self, status).await
    }

    async fn reconcile(&self) -> Result<usize> {
        Catalog::reconcile(self).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::Database;
    use crate::api::ItemDescriptor;

    async fn success_count(repo: &dyn RecordRepository) -> Result<i64> {
        repo.count_by_status(RecordStatus::Success).await
    }

    #[tokio::test]
    async fn test_repository_trait_delegates_to_catalog() {
        let catalog = Catalog::new(Database::new_in_memory().await.unwrap());
        let item = ItemDescriptor::from_value(json!({"id": 9, "url": "https://cdn/9.jpg"})).unwrap();

        let record = NewDownloadRecord::for_item(&item, RecordStatus::Success);
        RecordRepository::upsert_record(&catalog, &record).await.unwrap();
        assert!(!RecordRepository::insert_if_absent(&catalog, &record).await.unwrap());
        assert_eq!(success_count(&catalog).await.unwrap(), 1);
    }
}
