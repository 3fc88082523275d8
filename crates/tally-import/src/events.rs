//! Fire-and-forget import events
//!
//! Events are delivered at most once to whoever is subscribed at send time.
//! Observers that miss events (no subscription yet, lagging receiver) catch
//! up by re-reading the job.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ingest::models::{BatchStatus, ImportBatch, ImportJob, JobStatus};

/// Flat JSON payloads tagged by `event`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ImportEvent {
    JobStatus {
        job_id: Uuid,
        status: JobStatus,
        stage: Option<String>,
    },
    JobProgress {
        job_id: Uuid,
        processed_rows: i64,
        total_rows: Option<i64>,
        skipped_rows: i64,
        error_count: i64,
        downloaded_bytes: i64,
        download_total_bytes: Option<i64>,
        percent: f64,
    },
    BatchStatus {
        job_id: Uuid,
        batch_id: Uuid,
        batch_index: i32,
        status: BatchStatus,
        inserted_rows: i64,
        skipped_rows: i64,
        error_count: i64,
    },
    BatchError {
        job_id: Uuid,
        batch_id: Uuid,
        batch_index: i32,
        message: String,
    },
    JobCompleted {
        job_id: Uuid,
        processed_rows: i64,
        skipped_rows: i64,
        error_count: i64,
    },
    JobFailed {
        job_id: Uuid,
        message: String,
    },
}

impl ImportEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            ImportEvent::JobStatus { job_id, .. }
            | ImportEvent::JobProgress { job_id, .. }
            | ImportEvent::BatchStatus { job_id, .. }
            | ImportEvent::BatchError { job_id, .. }
            | ImportEvent::JobCompleted { job_id, .. }
            | ImportEvent::JobFailed { job_id, .. } => *job_id,
        }
    }

    pub fn job_status(job_id: Uuid, status: JobStatus, stage: Option<String>) -> Self {
        ImportEvent::JobStatus {
            job_id,
            status,
            stage,
        }
    }

    pub fn progress(job: &ImportJob) -> Self {
        ImportEvent::JobProgress {
            job_id: job.id,
            processed_rows: job.processed_rows.unwrap_or(0),
            total_rows: job.total_rows,
            skipped_rows: job.skipped_rows,
            error_count: job.error_count,
            downloaded_bytes: job.downloaded_bytes,
            download_total_bytes: job.download_total_bytes,
            percent: job.percent(),
        }
    }

    pub fn batch_status(batch: &ImportBatch) -> Self {
        ImportEvent::BatchStatus {
            job_id: batch.job_id,
            batch_id: batch.id,
            batch_index: batch.batch_index,
            status: batch.status,
            inserted_rows: batch.inserted_rows,
            skipped_rows: batch.skipped_rows,
            error_count: batch.error_count,
        }
    }
}

/// Broadcast hub shared by the pipeline and the service
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<ImportEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send to current subscribers; nobody listening is not an error
    pub fn publish(&self, event: ImportEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ImportEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_serialize_flat_with_tag() {
        let job_id = Uuid::new_v4();
        let event = ImportEvent::JobFailed {
            job_id,
            message: "HTTP 404".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "job_failed");
        assert_eq!(json["job_id"], job_id.to_string());
        assert_eq!(json["message"], "HTTP 404");
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let events = EventBroadcaster::new(4);
        events.publish(ImportEvent::job_status(Uuid::new_v4(), JobStatus::Queued, None));
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let events = EventBroadcaster::new(8);
        let mut rx = events.subscribe();
        let job_id = Uuid::new_v4();

        events.publish(ImportEvent::job_status(job_id, JobStatus::Queued, None));
        events.publish(ImportEvent::job_status(job_id, JobStatus::Downloading, None));

        assert!(matches!(
            rx.recv().await.unwrap(),
            ImportEvent::JobStatus { status: JobStatus::Queued, .. }
        ));
        let next = rx.recv().await.unwrap();
        assert_eq!(next.job_id(), job_id);
    }
}
