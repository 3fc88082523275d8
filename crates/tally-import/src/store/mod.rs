//! Persistence interface for jobs, batches, diagnostics and vote rows
//!
//! The pipeline only talks to [`ImportStore`]. [`PgImportStore`] is the
//! production backend; [`MemoryImportStore`] keeps the same semantics in
//! process memory and backs the test suite.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::ingest::models::{
    BatchRowStatus, BatchUpdate, ImportBatch, ImportBatchRow, ImportErrorEntry, ImportJob,
    ImportSource, IssueStatus, JobCounters, JobPatch, JobStatus, ValidationIssue, ValidationRun,
    ValidationStatus,
};
use crate::ingest::source::{RecordKind, VoteRecord};

pub mod memory;
pub mod postgres;

pub use memory::MemoryImportStore;
pub use postgres::PgImportStore;

/// Storage backend for the import pipeline
#[async_trait]
pub trait ImportStore: Send + Sync {
    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    async fn insert_job(&self, job: &ImportJob) -> Result<()>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ImportJob>>;

    /// Jobs in any of `statuses`, oldest first
    async fn jobs_with_status(&self, statuses: &[JobStatus]) -> Result<Vec<ImportJob>>;

    /// Jobs created from the same source location, oldest first
    async fn jobs_for_source(&self, source: &ImportSource) -> Result<Vec<ImportJob>>;

    /// Move the job to `to` only if it is currently in one of `from`
    ///
    /// Returns false when the job is missing or in another status.
    async fn transition_job(
        &self,
        job_id: Uuid,
        to: JobStatus,
        from: &[JobStatus],
        patch: &JobPatch,
    ) -> Result<bool>;

    async fn update_download_progress(
        &self,
        job_id: Uuid,
        downloaded_bytes: i64,
        total_bytes: Option<i64>,
    ) -> Result<()>;

    /// Overwrite the row counters
    async fn update_job_progress(&self, job_id: Uuid, counters: &JobCounters) -> Result<()>;

    /// Add deltas to the row counters (reprocessing)
    async fn adjust_job_counters(
        &self,
        job_id: Uuid,
        processed_delta: i64,
        skipped_delta: i64,
        error_delta: i64,
    ) -> Result<()>;

    async fn set_job_validation(
        &self,
        job_id: Uuid,
        status: ValidationStatus,
        message: &str,
    ) -> Result<()>;

    /// Move a failed or cancelled job back to pending
    ///
    /// Clears counters and every derived row (batches, batch rows,
    /// diagnostics, validation history, vote rows). Returns false if the job
    /// is not in a restartable status.
    async fn reset_job(&self, job_id: Uuid) -> Result<bool>;

    /// Delete the job and everything derived from it
    async fn delete_job(&self, job_id: Uuid) -> Result<bool>;

    // ------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------

    async fn insert_batch(&self, batch: &ImportBatch) -> Result<()>;

    async fn update_batch(&self, batch_id: Uuid, update: &BatchUpdate) -> Result<()>;

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<ImportBatch>>;

    /// Batches of a job in index order
    async fn list_batches(&self, job_id: Uuid) -> Result<Vec<ImportBatch>>;

    async fn insert_batch_rows(&self, rows: &[ImportBatchRow]) -> Result<()>;

    /// Snapshots of a batch in source order
    async fn list_batch_rows(&self, batch_id: Uuid) -> Result<Vec<ImportBatchRow>>;

    async fn update_batch_row(
        &self,
        row_id: Uuid,
        status: BatchRowStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Set every non-successful snapshot of a batch back to pending
    async fn reset_batch_rows(&self, batch_id: Uuid) -> Result<u64>;

    // ------------------------------------------------------------------
    // Diagnostics and validation
    // ------------------------------------------------------------------

    async fn insert_errors(&self, errors: &[ImportErrorEntry]) -> Result<()>;

    /// Diagnostics of a job, by row number then insertion time
    async fn list_errors(&self, job_id: Uuid) -> Result<Vec<ImportErrorEntry>>;

    async fn insert_validation_run(&self, run: &ValidationRun) -> Result<()>;

    async fn insert_validation_issue(&self, issue: &ValidationIssue) -> Result<()>;

    async fn list_validation_runs(&self, job_id: Uuid) -> Result<Vec<ValidationRun>>;

    async fn list_validation_issues(&self, job_id: Uuid) -> Result<Vec<ValidationIssue>>;

    /// Returns false when the issue does not exist
    async fn resolve_issue(
        &self,
        issue_id: Uuid,
        status: IssueStatus,
        resolved_by: &str,
    ) -> Result<bool>;

    // ------------------------------------------------------------------
    // Vote rows
    // ------------------------------------------------------------------

    /// Insert rows for `job_id`, returning how many were actually written
    ///
    /// Candidate rows that collide with an existing natural key are absorbed
    /// without error. Either every row is written or none is.
    async fn insert_records(&self, job_id: Uuid, records: &[VoteRecord]) -> Result<u64>;

    /// Vote rows attributed to `job_id`
    async fn count_records(&self, job_id: Uuid, kind: RecordKind) -> Result<i64>;

    /// Refresh planner statistics after a large load
    async fn refresh_statistics(&self, kind: RecordKind) -> Result<()>;
}
