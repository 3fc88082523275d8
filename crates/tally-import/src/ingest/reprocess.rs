//! Row-by-row replay of failed batches

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::engine::apply_update;
use super::models::{
    BatchRowStatus, BatchStatus, BatchUpdate, ImportBatch, ReprocessSummary,
};
use super::source::VoteRecord;
use crate::error::{PipelineError, Result};
use crate::events::{EventBroadcaster, ImportEvent};
use crate::store::ImportStore;

/// Error messages kept on a batch after replay
const MAX_SUMMARY_ERRORS: usize = 5;

pub struct Reprocessor {
    store: Arc<dyn ImportStore>,
    events: EventBroadcaster,
}

impl Reprocessor {
    pub fn new(store: Arc<dyn ImportStore>, events: EventBroadcaster) -> Self {
        Self { store, events }
    }

    /// Replay every row of a failed batch that has not succeeded yet
    pub async fn reprocess_batch(&self, batch_id: Uuid) -> Result<ReprocessSummary> {
        let mut batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Batch {}", batch_id)))?;

        let job = self
            .store
            .get_job(batch.job_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Job {}", batch.job_id)))?;

        if job.status.is_in_progress() {
            return Err(PipelineError::InvalidState(format!(
                "Job {} is {}; wait for it to finish before reprocessing",
                job.id, job.status
            )));
        }

        if batch.status != BatchStatus::Failed {
            return Err(PipelineError::InvalidState(format!(
                "Batch {} is {}; only failed batches can be reprocessed",
                batch.id, batch.status
            )));
        }

        let previous_errors = batch.error_count;
        self.store.reset_batch_rows(batch.id).await?;
        let rows = self.store.list_batch_rows(batch.id).await?;

        self.set_status(&mut batch, BatchStatus::Pending, 0, 0, 0, None).await?;
        self.set_status(&mut batch, BatchStatus::Processing, 0, 0, 0, None).await?;

        let mut already_inserted = 0i64;
        let mut summary = ReprocessSummary {
            batch_id: batch.id,
            replayed: 0,
            inserted: 0,
            skipped: 0,
            failed: 0,
            status: BatchStatus::Processing,
        };
        let mut messages = Vec::new();

        for row in rows {
            if row.status == BatchRowStatus::Success {
                already_inserted += 1;
                continue;
            }
            summary.replayed += 1;

            let outcome = match serde_json::from_value::<VoteRecord>(row.payload.clone()) {
                Ok(record) => self
                    .store
                    .insert_records(job.id, std::slice::from_ref(&record))
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(format!("Unreadable snapshot: {}", e)),
            };

            match outcome {
                Ok(0) => {
                    summary.skipped += 1;
                    self.store
                        .update_batch_row(row.id, BatchRowStatus::Skipped, Some("Duplicate row"))
                        .await?;
                },
                Ok(_) => {
                    summary.inserted += 1;
                    self.store.update_batch_row(row.id, BatchRowStatus::Success, None).await?;
                },
                Err(message) => {
                    summary.failed += 1;
                    if messages.len() < MAX_SUMMARY_ERRORS {
                        messages.push(format!("line {}: {}", row.row_number, message));
                    }
                    self.store
                        .update_batch_row(row.id, BatchRowStatus::Failed, Some(&message))
                        .await?;
                },
            }
        }

        summary.status = if summary.failed == 0 {
            BatchStatus::Completed
        } else {
            BatchStatus::Failed
        };
        let error_summary = (!messages.is_empty()).then(|| messages.join("; "));
        self.set_status(
            &mut batch,
            summary.status,
            already_inserted + summary.inserted,
            summary.skipped,
            summary.failed,
            error_summary,
        )
        .await?;

        self.store
            .adjust_job_counters(
                job.id,
                summary.inserted,
                summary.skipped,
                summary.failed - previous_errors,
            )
            .await?;

        if let Some(updated) = self.store.get_job(job.id).await? {
            self.events.publish(ImportEvent::progress(&updated));
        }

        if summary.failed > 0 {
            warn!(
                job_id = %job.id,
                batch_id = %batch.id,
                failed = summary.failed,
                "Batch still has failing rows after reprocessing"
            );
        } else {
            info!(
                job_id = %job.id,
                batch_id = %batch.id,
                inserted = summary.inserted,
                skipped = summary.skipped,
                "Batch reprocessed"
            );
        }

        Ok(summary)
    }

    /// Replay every failed batch of a job in index order
    pub async fn reprocess_all_failed(&self, job_id: Uuid) -> Result<Vec<ReprocessSummary>> {
        let failed: Vec<ImportBatch> = self
            .store
            .list_batches(job_id)
            .await?
            .into_iter()
            .filter(|b| b.status == BatchStatus::Failed)
            .collect();

        let mut summaries = Vec::with_capacity(failed.len());
        for batch in failed {
            summaries.push(self.reprocess_batch(batch.id).await?);
        }
        Ok(summaries)
    }

    async fn set_status(
        &self,
        batch: &mut ImportBatch,
        status: BatchStatus,
        inserted: i64,
        skipped: i64,
        errors: i64,
        error_summary: Option<String>,
    ) -> Result<()> {
        let processed = match status {
            BatchStatus::Completed | BatchStatus::Failed => inserted + skipped + errors,
            _ => 0,
        };
        let update = BatchUpdate {
            status,
            last_line: batch.last_line,
            total_rows: batch.total_rows,
            processed_rows: processed,
            inserted_rows: inserted,
            skipped_rows: skipped,
            error_count: errors,
            error_summary,
        };
        self.store.update_batch(batch.id, &update).await?;
        apply_update(batch, &update);
        self.events.publish(ImportEvent::batch_status(batch));
        Ok(())
    }
}
