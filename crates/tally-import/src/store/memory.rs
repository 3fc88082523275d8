//! In-memory [`ImportStore`]
//!
//! Mirrors the Postgres semantics that matter to the pipeline: status
//! compare-and-set, the candidate natural-key conflict rule, all-or-nothing
//! bulk inserts and cascading deletes. Insert failures can be injected to
//! exercise the batch failure and reprocessing paths.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::ImportStore;
use crate::error::{PipelineError, Result};
use crate::ingest::models::{
    BatchRowStatus, BatchStatus, BatchUpdate, ImportBatch, ImportBatchRow, ImportErrorEntry, ImportJob,
    ImportSource, IssueStatus, JobCounters, JobPatch, JobStatus, ValidationIssue, ValidationRun,
    ValidationStatus,
};
use crate::ingest::source::{CandidateVote, PartyVote, RecordKind, VoteRecord};

type CandidateKey = (i64, i64, i64, i64, i64, i64);

type InsertFault = Arc<dyn Fn(&VoteRecord) -> bool + Send + Sync>;

fn candidate_key(vote: &CandidateVote) -> CandidateKey {
    (
        vote.election_year,
        vote.round,
        vote.municipality_code,
        vote.zone,
        vote.role_code,
        vote.candidate_number,
    )
}

#[derive(Default)]
struct State {
    /// Insertion order doubles as creation order
    jobs: Vec<ImportJob>,
    batches: Vec<ImportBatch>,
    batch_rows: Vec<ImportBatchRow>,
    errors: Vec<ImportErrorEntry>,
    runs: Vec<ValidationRun>,
    issues: Vec<ValidationIssue>,
    candidates: Vec<(Uuid, CandidateVote)>,
    candidate_keys: HashSet<CandidateKey>,
    parties: Vec<(Uuid, PartyVote)>,
    statistics_refreshes: Vec<RecordKind>,
}

impl State {
    fn job_mut(&mut self, job_id: Uuid) -> Result<&mut ImportJob> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| PipelineError::NotFound(format!("Job {}", job_id)))
    }

    fn clear_derived(&mut self, job_id: Uuid) {
        let batch_ids: HashSet<Uuid> = self
            .batches
            .iter()
            .filter(|b| b.job_id == job_id)
            .map(|b| b.id)
            .collect();
        self.batch_rows.retain(|r| !batch_ids.contains(&r.batch_id));
        self.batches.retain(|b| b.job_id != job_id);
        self.errors.retain(|e| e.job_id != job_id);
        self.runs.retain(|r| r.job_id != job_id);
        self.issues.retain(|i| i.job_id != job_id);
        self.candidates.retain(|(owner, _)| *owner != job_id);
        self.parties.retain(|(owner, _)| *owner != job_id);
        self.candidate_keys = self.candidates.iter().map(|(_, c)| candidate_key(c)).collect();
    }
}

/// Process-local store
#[derive(Default)]
pub struct MemoryImportStore {
    state: Mutex<State>,
    fault: Mutex<Option<InsertFault>>,
}

impl MemoryImportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make bulk and single inserts fail whenever a record matches `predicate`
    pub async fn fail_inserts_when<F>(&self, predicate: F)
    where
        F: Fn(&VoteRecord) -> bool + Send + Sync + 'static,
    {
        *self.fault.lock().await = Some(Arc::new(predicate));
    }

    pub async fn clear_insert_fault(&self) {
        *self.fault.lock().await = None;
    }

    /// Kinds whose statistics were refreshed, in call order
    pub async fn statistics_refreshes(&self) -> Vec<RecordKind> {
        self.state.lock().await.statistics_refreshes.clone()
    }

    /// Drop destination rows without touching job counters
    pub async fn delete_records(&self, job_id: Uuid, limit: usize) -> usize {
        let mut state = self.state.lock().await;
        let mut removed = 0;
        state.candidates.retain(|(owner, _)| {
            if *owner == job_id && removed < limit {
                removed += 1;
                false
            } else {
                true
            }
        });
        state.parties.retain(|(owner, _)| {
            if *owner == job_id && removed < limit {
                removed += 1;
                false
            } else {
                true
            }
        });
        state.candidate_keys = state.candidates.iter().map(|(_, c)| candidate_key(c)).collect();
        removed
    }
}

#[async_trait]
impl ImportStore for MemoryImportStore {
    async fn insert_job(&self, job: &ImportJob) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.jobs.iter().any(|j| j.id == job.id) {
            return Err(PipelineError::InvalidState(format!("Job {} already exists", job.id)));
        }
        state.jobs.push(job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ImportJob>> {
        let state = self.state.lock().await;
        Ok(state.jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn jobs_with_status(&self, statuses: &[JobStatus]) -> Result<Vec<ImportJob>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<ImportJob> = state
            .jobs
            .iter()
            .filter(|j| statuses.contains(&j.status))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn jobs_for_source(&self, source: &ImportSource) -> Result<Vec<ImportJob>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<ImportJob> =
            state.jobs.iter().filter(|j| j.source == *source).cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn transition_job(
        &self,
        job_id: Uuid,
        to: JobStatus,
        from: &[JobStatus],
        patch: &JobPatch,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.iter_mut().find(|j| j.id == job_id) else {
            return Ok(false);
        };
        if !from.contains(&job.status) {
            return Ok(false);
        }
        let now = Utc::now();
        job.status = to;
        patch.apply(job, now);
        job.updated_at = now;
        Ok(true)
    }

    async fn update_download_progress(
        &self,
        job_id: Uuid,
        downloaded_bytes: i64,
        total_bytes: Option<i64>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        job.downloaded_bytes = downloaded_bytes;
        if total_bytes.is_some() {
            job.download_total_bytes = total_bytes;
        }
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn update_job_progress(&self, job_id: Uuid, counters: &JobCounters) -> Result<()> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        job.total_file_rows = Some(counters.total_file_rows);
        job.processed_rows = Some(counters.processed_rows);
        job.skipped_rows = counters.skipped_rows;
        job.error_count = counters.error_count;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn adjust_job_counters(
        &self,
        job_id: Uuid,
        processed_delta: i64,
        skipped_delta: i64,
        error_delta: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        job.processed_rows = Some(job.processed_rows.unwrap_or(0) + processed_delta);
        job.skipped_rows += skipped_delta;
        job.error_count = (job.error_count + error_delta).max(0);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn set_job_validation(
        &self,
        job_id: Uuid,
        status: ValidationStatus,
        message: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        job.validation_status = Some(status);
        job.validation_message = Some(message.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn reset_job(&self, job_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.iter_mut().find(|j| j.id == job_id) else {
            return Ok(false);
        };
        if !matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
            return Ok(false);
        }
        job.reset_progress();
        job.status = JobStatus::Pending;
        job.updated_at = Utc::now();
        state.clear_derived(job_id);
        Ok(true)
    }

    async fn delete_job(&self, job_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        let before = state.jobs.len();
        state.jobs.retain(|j| j.id != job_id);
        if state.jobs.len() == before {
            return Ok(false);
        }
        state.clear_derived(job_id);
        Ok(true)
    }

    async fn insert_batch(&self, batch: &ImportBatch) -> Result<()> {
        self.state.lock().await.batches.push(batch.clone());
        Ok(())
    }

    async fn update_batch(&self, batch_id: Uuid, update: &BatchUpdate) -> Result<()> {
        let mut state = self.state.lock().await;
        let batch = state
            .batches
            .iter_mut()
            .find(|b| b.id == batch_id)
            .ok_or_else(|| PipelineError::NotFound(format!("Batch {}", batch_id)))?;
        let now = Utc::now();
        batch.status = update.status;
        batch.last_line = update.last_line;
        batch.total_rows = update.total_rows;
        batch.processed_rows = update.processed_rows;
        batch.inserted_rows = update.inserted_rows;
        batch.skipped_rows = update.skipped_rows;
        batch.error_count = update.error_count;
        batch.error_summary = update.error_summary.clone();
        batch.updated_at = now;
        batch.completed_at = match update.status {
            BatchStatus::Completed | BatchStatus::Failed => Some(now),
            _ => None,
        };
        Ok(())
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<ImportBatch>> {
        let state = self.state.lock().await;
        Ok(state.batches.iter().find(|b| b.id == batch_id).cloned())
    }

    async fn list_batches(&self, job_id: Uuid) -> Result<Vec<ImportBatch>> {
        let state = self.state.lock().await;
        let mut batches: Vec<ImportBatch> =
            state.batches.iter().filter(|b| b.job_id == job_id).cloned().collect();
        batches.sort_by_key(|b| b.batch_index);
        Ok(batches)
    }

    async fn insert_batch_rows(&self, rows: &[ImportBatchRow]) -> Result<()> {
        self.state.lock().await.batch_rows.extend_from_slice(rows);
        Ok(())
    }

    async fn list_batch_rows(&self, batch_id: Uuid) -> Result<Vec<ImportBatchRow>> {
        let state = self.state.lock().await;
        let mut rows: Vec<ImportBatchRow> = state
            .batch_rows
            .iter()
            .filter(|r| r.batch_id == batch_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.row_number);
        Ok(rows)
    }

    async fn update_batch_row(
        &self,
        row_id: Uuid,
        status: BatchRowStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let row = state
            .batch_rows
            .iter_mut()
            .find(|r| r.id == row_id)
            .ok_or_else(|| PipelineError::NotFound(format!("Batch row {}", row_id)))?;
        row.status = status;
        row.error_message = error_message.map(str::to_string);
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn reset_batch_rows(&self, batch_id: Uuid) -> Result<u64> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut reset = 0;
        for row in state
            .batch_rows
            .iter_mut()
            .filter(|r| r.batch_id == batch_id && r.status != BatchRowStatus::Success)
        {
            row.status = BatchRowStatus::Pending;
            row.error_message = None;
            row.updated_at = now;
            reset += 1;
        }
        Ok(reset)
    }

    async fn insert_errors(&self, errors: &[ImportErrorEntry]) -> Result<()> {
        self.state.lock().await.errors.extend_from_slice(errors);
        Ok(())
    }

    async fn list_errors(&self, job_id: Uuid) -> Result<Vec<ImportErrorEntry>> {
        let state = self.state.lock().await;
        let mut errors: Vec<ImportErrorEntry> =
            state.errors.iter().filter(|e| e.job_id == job_id).cloned().collect();
        errors.sort_by_key(|e| (e.row_number.unwrap_or(i64::MAX), e.created_at));
        Ok(errors)
    }

    async fn insert_validation_run(&self, run: &ValidationRun) -> Result<()> {
        self.state.lock().await.runs.push(run.clone());
        Ok(())
    }

    async fn insert_validation_issue(&self, issue: &ValidationIssue) -> Result<()> {
        self.state.lock().await.issues.push(issue.clone());
        Ok(())
    }

    async fn list_validation_runs(&self, job_id: Uuid) -> Result<Vec<ValidationRun>> {
        let state = self.state.lock().await;
        Ok(state.runs.iter().filter(|r| r.job_id == job_id).cloned().collect())
    }

    async fn list_validation_issues(&self, job_id: Uuid) -> Result<Vec<ValidationIssue>> {
        let state = self.state.lock().await;
        Ok(state.issues.iter().filter(|i| i.job_id == job_id).cloned().collect())
    }

    async fn resolve_issue(
        &self,
        issue_id: Uuid,
        status: IssueStatus,
        resolved_by: &str,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(issue) = state.issues.iter_mut().find(|i| i.id == issue_id) else {
            return Ok(false);
        };
        issue.status = status;
        issue.resolved_by = Some(resolved_by.to_string());
        issue.resolved_at = Some(Utc::now());
        Ok(true)
    }

    async fn insert_records(&self, job_id: Uuid, records: &[VoteRecord]) -> Result<u64> {
        if let Some(fault) = self.fault.lock().await.clone() {
            if let Some(bad) = records.iter().find(|r| fault(*r)) {
                return Err(PipelineError::Internal(format!(
                    "Simulated constraint violation on {} row (year {})",
                    bad.kind(),
                    bad.election_year()
                )));
            }
        }

        let mut state = self.state.lock().await;
        let mut inserted = 0;
        for record in records {
            match record {
                VoteRecord::Candidate(vote) => {
                    if state.candidate_keys.insert(candidate_key(vote)) {
                        state.candidates.push((job_id, vote.clone()));
                        inserted += 1;
                    }
                },
                VoteRecord::Party(vote) => {
                    state.parties.push((job_id, vote.clone()));
                    inserted += 1;
                },
            }
        }
        Ok(inserted)
    }

    async fn count_records(&self, job_id: Uuid, kind: RecordKind) -> Result<i64> {
        let state = self.state.lock().await;
        let count = match kind {
            RecordKind::CandidateVotes => {
                state.candidates.iter().filter(|(owner, _)| *owner == job_id).count()
            },
            RecordKind::PartyVotes => {
                state.parties.iter().filter(|(owner, _)| *owner == job_id).count()
            },
        };
        Ok(count as i64)
    }

    async fn refresh_statistics(&self, kind: RecordKind) -> Result<()> {
        self.state.lock().await.statistics_refreshes.push(kind);
        Ok(())
    }
}
