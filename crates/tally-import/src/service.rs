//! In-process service surface
//!
//! [`ImportService`] owns the queue, the broadcaster and the pipeline, and is
//! the only entry point callers need: submission, lifecycle control,
//! reprocessing, integrity checks and read-side queries.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ImportConfig;
use crate::error::{PipelineError, Result};
use crate::events::{EventBroadcaster, ImportEvent};
use crate::ingest::maintenance::{LoggingHook, PostImportHook};
use crate::ingest::models::{
    ImportBatch, ImportErrorEntry, ImportJob, ImportRequest, ImportSource, IntegrityReport,
    IssueStatus, JobPatch, JobStatus, QueueStatus, ReprocessSummary, ValidationIssue,
};
use crate::ingest::pipeline::{remove_job_dir, ImportPipeline};
use crate::ingest::queue::ImportQueue;
use crate::ingest::reprocess::Reprocessor;
use crate::ingest::source::fetcher::validate_remote_url;
use crate::ingest::source::RecordKind;
use crate::ingest::state::{allowed_sources, stage_label};
use crate::ingest::validator::Validator;
use crate::store::ImportStore;

/// Message stored on jobs found mid-flight at startup
pub const INTERRUPTED_MESSAGE: &str =
    "Interrupted by process restart; restart the import to try again";

/// Outcome of the startup sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Jobs that were mid-flight and are now failed
    pub failed: Vec<Uuid>,
    /// Pending or queued jobs put back on the queue
    pub requeued: Vec<Uuid>,
}

pub struct ImportService {
    store: Arc<dyn ImportStore>,
    events: EventBroadcaster,
    config: ImportConfig,
    queue: ImportQueue,
    reprocessor: Reprocessor,
    validator: Validator,
}

impl ImportService {
    pub fn new(
        store: Arc<dyn ImportStore>,
        config: ImportConfig,
        hooks: Vec<Arc<dyn PostImportHook>>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        let events = EventBroadcaster::new(config.event_capacity);
        let pipeline = ImportPipeline::new(store.clone(), events.clone(), config.clone(), hooks)?;

        Ok(Self {
            queue: ImportQueue::new(Arc::new(pipeline)),
            reprocessor: Reprocessor::new(store.clone(), events.clone()),
            validator: Validator::new(store.clone()),
            store,
            events,
            config,
        })
    }

    /// Service with the logging post-import hook only
    pub fn with_default_hooks(store: Arc<dyn ImportStore>, config: ImportConfig) -> Result<Self> {
        Self::new(store, config, vec![Arc::new(LoggingHook)])
    }

    /// Create a job for `request` and put it on the queue
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn submit(&self, request: ImportRequest) -> Result<Uuid> {
        self.check_source(&request.source).await?;

        let kind = match request.kind {
            Some(kind) => kind,
            None => RecordKind::infer_from_name(&request.source.file_name()).ok_or_else(|| {
                PipelineError::Validation(format!(
                    "Cannot infer record kind from '{}'; specify it explicitly",
                    request.source.file_name()
                ))
            })?,
        };

        let job = ImportJob::new(request.source, kind, request.entry_name, request.filters);

        let existing = self
            .store
            .jobs_for_source(&job.source)
            .await?
            .into_iter()
            .find(|other| {
                other.same_submission(&job)
                    && !matches!(other.status, JobStatus::Failed | JobStatus::Cancelled)
            });
        if let Some(existing) = existing {
            return Err(PipelineError::DuplicateJob {
                existing_job_id: existing.id,
            });
        }

        self.store.insert_job(&job).await?;
        info!(
            job_id = %job.id,
            source = %job.source.location(),
            kind = %job.kind,
            "Import submitted"
        );
        self.events
            .publish(ImportEvent::job_status(job.id, JobStatus::Pending, None));

        self.enqueue_pending(job.id).await?;
        Ok(job.id)
    }

    /// Stop a job in any non-terminal status
    ///
    /// Returns false when the job is already terminal.
    pub async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        let job = self.job(job_id).await?;
        if job.status.is_terminal() {
            return Ok(false);
        }

        self.queue.remove_from_queue(job_id);
        self.queue.cancel_token(job_id);

        let stage = stage_label(JobStatus::Cancelled).to_string();
        let cancelled = self
            .store
            .transition_job(
                job_id,
                JobStatus::Cancelled,
                allowed_sources(JobStatus::Cancelled),
                &JobPatch {
                    stage: Some(stage.clone()),
                    mark_completed: true,
                    ..JobPatch::default()
                },
            )
            .await?;

        if cancelled {
            info!(job_id = %job_id, from = %job.status, "Import cancelled");
            self.events
                .publish(ImportEvent::job_status(job_id, JobStatus::Cancelled, Some(stage)));
            remove_job_dir(&self.config.job_dir(job_id)).await;
        }

        Ok(cancelled)
    }

    /// Clear a failed or cancelled remote job and queue it again under the same id
    pub async fn restart(&self, job_id: Uuid) -> Result<Uuid> {
        let job = self.job(job_id).await?;

        if !job.source.is_remote() {
            return Err(PipelineError::Validation(
                "Only remote-sourced imports can be restarted; submit the file again".into(),
            ));
        }
        if !matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
            return Err(PipelineError::InvalidState(format!(
                "Job {} is {}; only failed or cancelled imports can be restarted",
                job_id, job.status
            )));
        }
        self.ensure_not_running(job_id)?;

        if !self.store.reset_job(job_id).await? {
            return Err(PipelineError::InvalidState(format!(
                "Job {} changed status while restarting",
                job_id
            )));
        }
        remove_job_dir(&self.config.job_dir(job_id)).await;

        info!(job_id = %job_id, "Import restarted");
        self.events
            .publish(ImportEvent::job_status(job_id, JobStatus::Pending, None));
        self.enqueue_pending(job_id).await?;

        Ok(job_id)
    }

    /// Remove a job and everything derived from it
    pub async fn delete_job(&self, job_id: Uuid) -> Result<()> {
        let job = self.job(job_id).await?;
        if job.status.is_in_progress() {
            return Err(PipelineError::InvalidState(format!(
                "Job {} is {}; cancel it before deleting",
                job_id, job.status
            )));
        }
        self.ensure_not_running(job_id)?;

        self.queue.remove_from_queue(job_id);
        if !self.store.delete_job(job_id).await? {
            return Err(PipelineError::NotFound(format!("Job {}", job_id)));
        }
        remove_job_dir(&self.config.job_dir(job_id)).await;

        info!(job_id = %job_id, "Import deleted");
        Ok(())
    }

    pub async fn reprocess_batch(&self, batch_id: Uuid) -> Result<ReprocessSummary> {
        self.reprocessor.reprocess_batch(batch_id).await
    }

    /// Like [`reprocess_batch`](Self::reprocess_batch), but the batch must belong to `job_id`
    pub async fn reprocess_job_batch(
        &self,
        job_id: Uuid,
        batch_id: Uuid,
    ) -> Result<ReprocessSummary> {
        let batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Batch {}", batch_id)))?;
        if batch.job_id != job_id {
            return Err(PipelineError::Validation(format!(
                "Batch {} belongs to job {}, not {}",
                batch_id, batch.job_id, job_id
            )));
        }
        self.reprocessor.reprocess_batch(batch_id).await
    }

    pub async fn reprocess_all_failed(&self, job_id: Uuid) -> Result<Vec<ReprocessSummary>> {
        self.job(job_id).await?;
        self.reprocessor.reprocess_all_failed(job_id).await
    }

    pub async fn validate_integrity(&self, job_id: Uuid) -> Result<IntegrityReport> {
        self.validator.validate(job_id).await
    }

    pub async fn resolve_issue(
        &self,
        issue_id: Uuid,
        status: IssueStatus,
        resolved_by: &str,
    ) -> Result<()> {
        self.validator.resolve_issue(issue_id, status, resolved_by).await
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    /// Startup sweep
    ///
    /// Jobs left downloading, extracting or processing by a previous process
    /// are failed; pending and queued jobs go back on the queue oldest first.
    pub async fn recover_orphaned_jobs(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let orphaned = self
            .store
            .jobs_with_status(&[
                JobStatus::Downloading,
                JobStatus::Extracting,
                JobStatus::Processing,
            ])
            .await?;
        for job in orphaned {
            let failed = self
                .store
                .transition_job(
                    job.id,
                    JobStatus::Failed,
                    allowed_sources(JobStatus::Failed),
                    &JobPatch {
                        stage: Some(stage_label(JobStatus::Failed).to_string()),
                        ..JobPatch::failed(INTERRUPTED_MESSAGE)
                    },
                )
                .await?;
            if failed {
                warn!(job_id = %job.id, was = %job.status, "Orphaned import marked failed");
                self.events.publish(ImportEvent::JobFailed {
                    job_id: job.id,
                    message: INTERRUPTED_MESSAGE.to_string(),
                });
                remove_job_dir(&self.config.job_dir(job.id)).await;
                report.failed.push(job.id);
            }
        }

        let waiting = self
            .store
            .jobs_with_status(&[JobStatus::Pending, JobStatus::Queued])
            .await?;
        for job in waiting {
            let requeued = match job.status {
                JobStatus::Pending => self.enqueue_pending(job.id).await,
                _ => self.queue.enqueue(job.id),
            };
            match requeued {
                Ok(()) => report.requeued.push(job.id),
                Err(e) => debug!(job_id = %job.id, error = %e, "Job not requeued"),
            }
        }

        info!(
            failed = report.failed.len(),
            requeued = report.requeued.len(),
            "Startup sweep finished"
        );
        Ok(report)
    }

    pub async fn job(&self, job_id: Uuid) -> Result<ImportJob> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Job {}", job_id)))
    }

    pub async fn batches(&self, job_id: Uuid) -> Result<Vec<ImportBatch>> {
        self.store.list_batches(job_id).await
    }

    pub async fn errors(&self, job_id: Uuid) -> Result<Vec<ImportErrorEntry>> {
        self.store.list_errors(job_id).await
    }

    pub async fn validation_issues(&self, job_id: Uuid) -> Result<Vec<ValidationIssue>> {
        self.store.list_validation_issues(job_id).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ImportEvent> {
        self.events.subscribe()
    }

    /// Resolves once the queue has no running or waiting job
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await
    }

    async fn check_source(&self, source: &ImportSource) -> Result<()> {
        match source {
            ImportSource::Remote { url } => {
                validate_remote_url(url, &self.config.allowed_domains)?;
            },
            ImportSource::Upload { path } => {
                let meta = tokio::fs::metadata(path).await.map_err(|e| {
                    PipelineError::Validation(format!(
                        "Cannot read uploaded file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                if !meta.is_file() {
                    return Err(PipelineError::Validation(format!(
                        "{} is not a file",
                        path.display()
                    )));
                }
            },
        }
        Ok(())
    }

    async fn enqueue_pending(&self, job_id: Uuid) -> Result<()> {
        let stage = stage_label(JobStatus::Queued).to_string();
        let queued = self
            .store
            .transition_job(
                job_id,
                JobStatus::Queued,
                allowed_sources(JobStatus::Queued),
                &JobPatch::stage(stage.clone()),
            )
            .await?;
        if !queued {
            return Err(PipelineError::InvalidState(format!(
                "Job {} is no longer pending",
                job_id
            )));
        }

        self.events
            .publish(ImportEvent::job_status(job_id, JobStatus::Queued, Some(stage)));
        self.queue.enqueue(job_id)
    }

    /// A cancelled job can still be winding down on the worker
    fn ensure_not_running(&self, job_id: Uuid) -> Result<()> {
        if self.queue.status().current_job_id == Some(job_id) {
            return Err(PipelineError::InvalidState(format!(
                "Job {} is still stopping; try again shortly",
                job_id
            )));
        }
        Ok(())
    }
}
