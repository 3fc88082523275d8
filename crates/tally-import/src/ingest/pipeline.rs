//! Pipeline driver
//!
//! Runs one job through fetch, extract, schema resolution and the batch
//! engine. Every exit path leaves the job in a terminal status: errors become
//! `failed`, cancellation becomes `cancelled`, and the job directory is
//! removed afterwards.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::engine::BatchEngine;
use super::maintenance::{Maintenance, PostImportHook};
use super::models::{ImportErrorEntry, ImportJob, ImportSource, JobPatch, JobStatus};
use super::queue::JobRunner;
use super::source::decoder::count_data_rows;
use super::source::{extractor, schema, ArchiveFetcher, DownloadProgress, RowDecoder};
use super::state::{allowed_sources, stage_label};
use super::validator::Validator;
use crate::config::ImportConfig;
use crate::error::{PipelineError, Result};
use crate::events::{EventBroadcaster, ImportEvent};
use crate::store::ImportStore;

/// Persists throttled download progress and mirrors it as an event
struct StoreProgress<'a> {
    store: &'a dyn ImportStore,
    events: &'a EventBroadcaster,
    job: &'a ImportJob,
}

#[async_trait]
impl<'a> DownloadProgress for StoreProgress<'a> {
    async fn report(&self, downloaded_bytes: u64, total_bytes: Option<u64>) {
        let downloaded = downloaded_bytes as i64;
        let total = total_bytes.map(|t| t as i64);

        if let Err(e) = self
            .store
            .update_download_progress(self.job.id, downloaded, total)
            .await
        {
            warn!(job_id = %self.job.id, error = %e, "Failed to persist download progress");
        }

        let mut snapshot = self.job.clone();
        snapshot.downloaded_bytes = downloaded;
        snapshot.download_total_bytes = total;
        self.events.publish(ImportEvent::progress(&snapshot));
    }
}

/// Best-effort removal of a job's temporary directory
pub async fn remove_job_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(path = %dir.display(), "Removed job directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => warn!(path = %dir.display(), error = %e, "Failed to remove job directory"),
    }
}

pub struct ImportPipeline {
    store: Arc<dyn ImportStore>,
    events: EventBroadcaster,
    config: ImportConfig,
    fetcher: ArchiveFetcher,
    engine: BatchEngine,
    validator: Validator,
    maintenance: Maintenance,
}

impl ImportPipeline {
    pub fn new(
        store: Arc<dyn ImportStore>,
        events: EventBroadcaster,
        config: ImportConfig,
        hooks: Vec<Arc<dyn PostImportHook>>,
    ) -> Result<Self> {
        let fetcher = ArchiveFetcher::new(
            config.allowed_domains.clone(),
            config.download_progress_interval(),
            Duration::from_secs(config.http_timeout_secs),
        )?;
        let engine = BatchEngine::new(
            store.clone(),
            events.clone(),
            config.batch_size,
            config.progress_every_batches,
        );

        Ok(Self {
            validator: Validator::new(store.clone()),
            maintenance: Maintenance::new(store.clone(), hooks),
            store,
            events,
            config,
            fetcher,
            engine,
        })
    }

    async fn execute(&self, job_id: Uuid, cancel: &CancellationToken) -> Result<()> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Job {}", job_id)))?;
        let job_dir = self.config.job_dir(job.id);

        checkpoint(cancel)?;
        self.advance(
            job.id,
            JobStatus::Downloading,
            JobPatch {
                mark_started: true,
                ..JobPatch::default()
            },
        )
        .await?;

        let archive = self.acquire_archive(&job, &job_dir, cancel).await?;

        checkpoint(cancel)?;
        self.advance(job.id, JobStatus::Extracting, JobPatch::default())
            .await?;
        let entry = extractor::extract(&archive, &job_dir, job.entry_name.clone()).await?;

        let variant = schema::resolve_file(job.kind, &entry.path)?;
        let estimate = {
            let path = entry.path.clone();
            tokio::task::spawn_blocking(move || count_data_rows(&path)).await??
        };
        info!(
            job_id = %job.id,
            entry = %entry.entry_name,
            variant = variant.as_str(),
            estimated_rows = estimate,
            "Data entry ready"
        );

        checkpoint(cancel)?;
        self.advance(
            job.id,
            JobStatus::Processing,
            JobPatch {
                schema_variant: Some(variant),
                total_rows: Some(estimate as i64),
                ..JobPatch::default()
            },
        )
        .await?;

        // Reload so the engine sees the resolved variant and row estimate
        let job = self
            .store
            .get_job(job.id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Job {}", job.id)))?;

        let (tx, rx) = mpsc::channel(self.config.batch_size.max(1));
        let decoder = RowDecoder::new(variant);
        let decode = {
            let path = entry.path.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || decoder.decode_file(&path, tx, cancel))
        };

        let processed = self.engine.run(&job, rx, cancel).await;
        let decoded = decode.await?;
        let outcome = processed?;
        decoded?;
        checkpoint(cancel)?;

        self.advance(
            job.id,
            JobStatus::Completed,
            JobPatch {
                mark_completed: true,
                ..JobPatch::default()
            },
        )
        .await?;
        self.events.publish(ImportEvent::JobCompleted {
            job_id: job.id,
            processed_rows: outcome.counters.processed_rows,
            skipped_rows: outcome.counters.skipped_rows,
            error_count: outcome.counters.error_count,
        });
        info!(
            job_id = %job.id,
            inserted = outcome.counters.processed_rows,
            skipped = outcome.counters.skipped_rows,
            errors = outcome.counters.error_count,
            failed_batches = outcome.failed_batches,
            "Import completed"
        );

        if let Err(e) = self.validator.validate(job.id).await {
            warn!(job_id = %job.id, error = %e, "Integrity check could not run");
        }

        if let Some(completed) = self.store.get_job(job.id).await? {
            self.maintenance.spawn(completed);
        }

        Ok(())
    }

    /// Local path of the archive, downloading it first for remote sources
    async fn acquire_archive(
        &self,
        job: &ImportJob,
        job_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        match &job.source {
            ImportSource::Remote { url } => {
                let progress = StoreProgress {
                    store: self.store.as_ref(),
                    events: &self.events,
                    job,
                };
                let fetched = self.fetcher.fetch(url, job_dir, cancel, &progress).await?;
                info!(job_id = %job.id, bytes = fetched.bytes, "Archive downloaded");
                Ok(fetched.path)
            },
            ImportSource::Upload { path } => {
                let size = tokio::fs::metadata(path).await?.len() as i64;
                self.store
                    .update_download_progress(job.id, size, Some(size))
                    .await?;
                Ok(path.clone())
            },
        }
    }

    /// Compare-and-set `job_id` to `to`, publishing the new status
    async fn advance(&self, job_id: Uuid, to: JobStatus, mut patch: JobPatch) -> Result<()> {
        if patch.stage.is_none() {
            patch.stage = Some(stage_label(to).to_string());
        }

        if self
            .store
            .transition_job(job_id, to, allowed_sources(to), &patch)
            .await?
        {
            debug!(job_id = %job_id, status = %to, "Job transitioned");
            self.events
                .publish(ImportEvent::job_status(job_id, to, patch.stage));
            return Ok(());
        }

        match self.store.get_job(job_id).await? {
            Some(job) if job.status == JobStatus::Cancelled => Err(PipelineError::Cancelled),
            Some(job) => Err(PipelineError::InvalidState(format!(
                "Job {} cannot move from {} to {}",
                job_id, job.status, to
            ))),
            None => Err(PipelineError::NotFound(format!("Job {}", job_id))),
        }
    }

    async fn mark_failed(&self, job_id: Uuid, kind: &str, message: String) {
        let entry = ImportErrorEntry::new(job_id, None, kind, message.clone(), None);
        if let Err(e) = self.store.insert_errors(&[entry]).await {
            warn!(job_id = %job_id, error = %e, "Failed to record job failure diagnostic");
        }

        match self
            .store
            .transition_job(
                job_id,
                JobStatus::Failed,
                allowed_sources(JobStatus::Failed),
                &JobPatch {
                    stage: Some(stage_label(JobStatus::Failed).to_string()),
                    ..JobPatch::failed(message.clone())
                },
            )
            .await
        {
            Ok(true) => {
                error!(job_id = %job_id, error = %message, "Import failed");
                self.events.publish(ImportEvent::job_status(
                    job_id,
                    JobStatus::Failed,
                    Some(stage_label(JobStatus::Failed).to_string()),
                ));
                self.events.publish(ImportEvent::JobFailed { job_id, message });
            },
            Ok(false) => debug!(job_id = %job_id, "Job already terminal; failure not recorded"),
            Err(e) => error!(job_id = %job_id, error = %e, "Failed to mark job failed"),
        }
    }

    async fn mark_cancelled(&self, job_id: Uuid) {
        let stage = stage_label(JobStatus::Cancelled).to_string();
        match self
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
            .await
        {
            Ok(true) => {
                self.events
                    .publish(ImportEvent::job_status(job_id, JobStatus::Cancelled, Some(stage)));
            },
            Ok(false) => {},
            Err(e) => error!(job_id = %job_id, error = %e, "Failed to mark job cancelled"),
        }
        info!(job_id = %job_id, "Import cancelled");
    }
}

#[async_trait]
impl JobRunner for ImportPipeline {
    async fn run(&self, job_id: Uuid, cancel: CancellationToken) {
        info!(job_id = %job_id, "Import started");

        match self.execute(job_id, &cancel).await {
            Ok(()) => {},
            Err(e) if e.is_cancelled() => self.mark_cancelled(job_id).await,
            Err(e) => self.mark_failed(job_id, e.kind(), e.to_string()).await,
        }

        remove_job_dir(&self.config.job_dir(job_id)).await;
    }

    async fn abort(&self, job_id: Uuid, message: String) {
        self.mark_failed(job_id, "internal", message).await;
        remove_job_dir(&self.config.job_dir(job_id)).await;
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}
