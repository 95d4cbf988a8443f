//! One work unit: fetch, sniff, filter, place, record, mark.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, instrument, warn};

use super::context::{RunContext, UnitOutcome};
use crate::api::ItemDescriptor;
use crate::catalog::{NewDownloadRecord, RecordRepository, RecordStatus};
use crate::config::EngineConfig;
use crate::download::{FetchedFile, MediaSource, RetryPolicy, with_retry};
use crate::ledger::Ledger;
use crate::sniff::{best_effort_extension, sniff};
use crate::storage::{Placement, StorageLayout, discard};

/// Shared, immutable collaborators of every unit in a run.
pub(crate) struct Pipeline {
    pub media: Arc<dyn MediaSource>,
    pub records: Arc<dyn RecordRepository>,
    pub ledger: Arc<Ledger>,
    pub layout: StorageLayout,
    pub config: Arc<EngineConfig>,
    pub retry: RetryPolicy,
}

impl Pipeline {
    /// Runs one unit to a terminal outcome. Never fails: per-item errors are
    /// recorded and reported as [`UnitOutcome::Failed`].
    #[instrument(skip_all, fields(item_id = %item.id))]
    pub(crate) async fn process(&self, item: &ItemDescriptor, ctx: &RunContext) -> UnitOutcome {
        if self.ledger.seen(&item.id) {
            debug!("already in ledger");
            return UnitOutcome::AlreadySeen;
        }

        let Some(url) = item.source_url.as_deref() else {
            return self.fail(item, "item has no source URL", 0).await;
        };

        let partial = match self.layout.partial_path(&item.id) {
            Ok(path) => path,
            Err(e) => return self.fail(item, &e.to_string(), 0).await,
        };

        // A dispatched unit runs its retries out even when a graceful stop
        // arrives; only a forced stop abandons it.
        let media = &self.media;
        let partial_ref = partial.as_path();
        let outcome = with_retry(&self.retry, "media", |_| media.fetch_to(url, partial_ref)).await;
        ctx.add_retries(outcome.attempts.saturating_sub(1));

        let fetched = match outcome.result {
            Ok(fetched) => fetched,
            Err(e) => {
                discard(&partial).await;
                warn!(error = %e, attempts = outcome.attempts, "download failed");
                return self.fail(item, &e.to_string(), outcome.attempts).await;
            }
        };

        let stored = self.store(item, url, &partial, &fetched, outcome.attempts).await;
        if stored == UnitOutcome::Downloaded {
            ctx.add_bytes(fetched.bytes_written);
        }
        stored
    }

    async fn store(
        &self,
        item: &ItemDescriptor,
        url: &str,
        partial: &Path,
        fetched: &FetchedFile,
        attempts: u32,
    ) -> UnitOutcome {
        let kind = sniff(&fetched.head);
        let extension = kind
            .extension()
            .map_or_else(|| best_effort_extension(url), str::to_string);

        if !self.config.allows_type(&extension) {
            debug!(kind = %kind, extension = %extension, "type not allowed");
            discard(partial).await;
            let mut record = NewDownloadRecord::for_item(item, RecordStatus::Skipped);
            record.file_extension = Some(&extension);
            record.attempts = attempts;
            if !self.write_record(&record).await {
                return UnitOutcome::Failed;
            }
            self.mark(&item.id).await;
            return UnitOutcome::Filtered;
        }

        let category = self.config.thresholds.category_for(item.rating);
        let dest = match self
            .layout
            .media_path(&item.id, &extension, kind.is_video(), category)
        {
            Ok(dest) => dest,
            Err(e) => {
                discard(partial).await;
                return self.fail(item, &e.to_string(), attempts).await;
            }
        };

        let placement = match self.layout.place(partial, &dest).await {
            Ok(placement) => placement,
            Err(e) => {
                discard(partial).await;
                error!(error = %e, "could not store file");
                return self.fail(item, &e.to_string(), attempts).await;
            }
        };

        let folder = dest
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut record = NewDownloadRecord::for_item(item, RecordStatus::Success);
        record.local_filename = Some(&file_name);
        record.folder_path = Some(&folder);
        record.file_extension = Some(&extension);
        record.file_size = i64::try_from(fetched.bytes_written).ok();
        record.needs_review = kind.is_unknown();
        record.attempts = attempts;

        if placement == Placement::AlreadyExists {
            debug!(path = %dest.display(), "file already on disk");
            if let Err(e) = self.records.insert_if_absent(&record).await {
                error!(error = %e, "failed to record existing file");
                return UnitOutcome::Failed;
            }
            self.mark(&item.id).await;
            return UnitOutcome::AlreadyStored;
        }

        if self.config.save_metadata {
            match self.layout.metadata_path(&item.id, category) {
                Ok(path) => {
                    if let Err(e) = self.layout.write_metadata(&path, &item.raw).await {
                        warn!(error = %e, "failed to write metadata sidecar");
                    }
                }
                Err(e) => warn!(error = %e, "no metadata path"),
            }
        }

        if !self.write_record(&record).await {
            return UnitOutcome::Failed;
        }
        if let Some(meta) = &item.generation
            && let Err(e) = self.records.store_generation_params(&item.id, meta).await
        {
            warn!(error = %e, "failed to store generation parameters");
        }
        if let Err(e) = self.records.store_tags(&item.id, &item.tags).await {
            warn!(error = %e, "failed to store tags");
        }

        self.mark(&item.id).await;
        if kind.is_unknown() {
            warn!(path = %dest.display(), "unrecognized content stored for review");
        }
        debug!(path = %dest.display(), bytes = fetched.bytes_written, "stored");
        UnitOutcome::Downloaded
    }

    /// Records a failure and, when configured, marks the ledger.
    async fn fail(&self, item: &ItemDescriptor, message: &str, attempts: u32) -> UnitOutcome {
        let mut record = NewDownloadRecord::for_item(item, RecordStatus::Failed);
        record.error_message = Some(message);
        record.attempts = attempts;
        if self.write_record(&record).await && self.config.mark_failed_in_ledger {
            self.mark(&item.id).await;
        }
        UnitOutcome::Failed
    }

    async fn write_record(&self, record: &NewDownloadRecord<'_>) -> bool {
        match self.records.upsert_record(record).await {
            Ok(()) => true,
            Err(e) => {
                error!(item_id = %record.item_id, error = %e, "failed to write download record");
                false
            }
        }
    }

    async fn mark(&self, item_id: &str) {
        if let Err(e) = self.ledger.mark(item_id).await {
            error!(item_id, error = %e, "failed to mark ledger");
        }
    }
}
