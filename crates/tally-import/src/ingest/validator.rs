//! Post-import integrity check
//!
//! Compares the vote rows attributed to a job with the number the pipeline
//! reported. A mismatch is recorded as an open issue and flagged on the job;
//! it never changes the job status.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::models::{
    ImportJob, IntegrityReport, IssueStatus, ValidationIssue, ValidationRun, ValidationStatus,
};
use crate::error::{PipelineError, Result};
use crate::store::ImportStore;

pub const ROW_COUNT_MISMATCH: &str = "row_count_mismatch";
pub const SEVERITY_ERROR: &str = "error";

/// Rows the job claims to have stored
///
/// Falls back to read rows minus skipped and errored ones when the inserted
/// count was never persisted.
pub fn expected_count(job: &ImportJob) -> i64 {
    match job.processed_rows {
        Some(processed) => processed,
        None => {
            (job.total_file_rows.unwrap_or(0) - job.skipped_rows - job.error_count).max(0)
        },
    }
}

pub struct Validator {
    store: Arc<dyn ImportStore>,
}

impl Validator {
    pub fn new(store: Arc<dyn ImportStore>) -> Self {
        Self { store }
    }

    pub async fn validate(&self, job_id: Uuid) -> Result<IntegrityReport> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Job {}", job_id)))?;

        let db_row_count = self.store.count_records(job.id, job.kind).await?;
        let expected = expected_count(&job);
        let is_valid = db_row_count == expected;

        let message = if is_valid {
            format!("{} rows present as expected", db_row_count)
        } else {
            format!(
                "Expected {} rows for job but found {} ({} {})",
                expected,
                db_row_count,
                (db_row_count - expected).abs(),
                if db_row_count < expected { "missing" } else { "extra" }
            )
        };

        let run = ValidationRun {
            id: Uuid::new_v4(),
            job_id: job.id,
            is_valid,
            db_row_count,
            expected_count: expected,
            message: message.clone(),
            created_at: Utc::now(),
        };
        self.store.insert_validation_run(&run).await?;

        if is_valid {
            info!(job_id = %job.id, rows = db_row_count, "Integrity check passed");
            self.store
                .set_job_validation(job.id, ValidationStatus::Passed, &message)
                .await?;
        } else {
            warn!(job_id = %job.id, expected, found = db_row_count, "Integrity check failed");
            self.store
                .insert_validation_issue(&ValidationIssue {
                    id: Uuid::new_v4(),
                    run_id: run.id,
                    job_id: job.id,
                    issue_type: ROW_COUNT_MISMATCH.to_string(),
                    severity: SEVERITY_ERROR.to_string(),
                    status: IssueStatus::Open,
                    message: message.clone(),
                    resolved_by: None,
                    resolved_at: None,
                    created_at: run.created_at,
                })
                .await?;
            self.store
                .set_job_validation(job.id, ValidationStatus::Failed, &message)
                .await?;
        }

        Ok(IntegrityReport {
            is_valid,
            db_row_count,
            expected_count: expected,
            message,
        })
    }

    /// Record operator remediation of an issue
    pub async fn resolve_issue(
        &self,
        issue_id: Uuid,
        status: IssueStatus,
        resolved_by: &str,
    ) -> Result<()> {
        if status == IssueStatus::Open {
            return Err(PipelineError::Validation(
                "An issue can only be marked resolved or ignored".into(),
            ));
        }
        if resolved_by.trim().is_empty() {
            return Err(PipelineError::Validation("Resolver name is required".into()));
        }

        if !self.store.resolve_issue(issue_id, status, resolved_by).await? {
            return Err(PipelineError::NotFound(format!("Validation issue {}", issue_id)));
        }

        info!(issue_id = %issue_id, status = %status, resolved_by, "Validation issue closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::models::ImportSource;
    use crate::ingest::source::{ImportFilters, RecordKind};

    fn job() -> ImportJob {
        ImportJob::new(
            ImportSource::Upload {
                path: "/tmp/votacao_candidato_munzona_2022.zip".into(),
            },
            RecordKind::CandidateVotes,
            None,
            ImportFilters::default(),
        )
    }

    #[test]
    fn test_expected_prefers_inserted_rows() {
        let mut job = job();
        job.total_file_rows = Some(100);
        job.skipped_rows = 10;
        job.error_count = 5;
        assert_eq!(expected_count(&job), 85);

        job.processed_rows = Some(80);
        assert_eq!(expected_count(&job), 80);
    }

    #[test]
    fn test_expected_never_negative() {
        let mut job = job();
        job.skipped_rows = 3;
        assert_eq!(expected_count(&job), 0);
    }
}
