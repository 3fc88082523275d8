//! Core types of the import pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::ingest::source::{ImportFilters, RecordKind, SchemaVariant};

/// Enum stored as a lowercase string column
macro_rules! db_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = PipelineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(PipelineError::Internal(format!(
                        concat!("Unknown ", stringify!($name), " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

db_enum! {
    /// Import job lifecycle status
    JobStatus {
        Pending => "pending",
        Queued => "queued",
        Downloading => "downloading",
        Extracting => "extracting",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl JobStatus {
    pub const ALL: [JobStatus; 8] = [
        JobStatus::Pending,
        JobStatus::Queued,
        JobStatus::Downloading,
        JobStatus::Extracting,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Work is actively running for the job
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            JobStatus::Downloading | JobStatus::Extracting | JobStatus::Processing
        )
    }
}

db_enum! {
    BatchStatus {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
    }
}

db_enum! {
    BatchRowStatus {
        Pending => "pending",
        Success => "success",
        Failed => "failed",
        Skipped => "skipped",
    }
}

db_enum! {
    ValidationStatus {
        Passed => "passed",
        Failed => "failed",
    }
}

db_enum! {
    IssueStatus {
        Open => "open",
        Resolved => "resolved",
        Ignored => "ignored",
    }
}

/// Where the archive comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImportSource {
    /// A file already on local disk
    Upload { path: PathBuf },
    Remote { url: String },
}

impl ImportSource {
    pub fn source_type(&self) -> &'static str {
        match self {
            ImportSource::Upload { .. } => "upload",
            ImportSource::Remote { .. } => "remote",
        }
    }

    /// Path or URL, as stored
    pub fn location(&self) -> String {
        match self {
            ImportSource::Upload { path } => path.to_string_lossy().into_owned(),
            ImportSource::Remote { url } => url.clone(),
        }
    }

    pub fn from_parts(source_type: &str, location: String) -> Result<Self, PipelineError> {
        match source_type {
            "upload" => Ok(ImportSource::Upload {
                path: PathBuf::from(location),
            }),
            "remote" => Ok(ImportSource::Remote { url: location }),
            other => Err(PipelineError::Internal(format!("Unknown source type '{}'", other))),
        }
    }

    /// File name used for record-kind inference
    pub fn file_name(&self) -> String {
        let location = self.location();
        location
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(location.as_str())
            .to_string()
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ImportSource::Remote { .. })
    }
}

/// A submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    pub source: ImportSource,
    /// Inferred from the file name when absent
    pub kind: Option<RecordKind>,
    /// Specific entry inside the archive
    pub entry_name: Option<String>,
    #[serde(default)]
    pub filters: ImportFilters,
}

/// Import job (maps to import_jobs table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub source: ImportSource,
    pub entry_name: Option<String>,
    pub kind: RecordKind,
    pub filters: ImportFilters,
    pub status: JobStatus,
    pub stage: Option<String>,
    pub schema_variant: Option<SchemaVariant>,
    pub downloaded_bytes: i64,
    pub download_total_bytes: Option<i64>,
    /// Pre-counted estimate, used for percent progress
    pub total_rows: Option<i64>,
    /// Data rows actually read
    pub total_file_rows: Option<i64>,
    /// Rows durably inserted
    pub processed_rows: Option<i64>,
    pub skipped_rows: i64,
    pub error_count: i64,
    pub validation_status: Option<ValidationStatus>,
    pub validation_message: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    pub fn new(source: ImportSource, kind: RecordKind, entry_name: Option<String>, filters: ImportFilters) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source,
            entry_name,
            kind,
            filters,
            status: JobStatus::Pending,
            stage: None,
            schema_variant: None,
            downloaded_bytes: 0,
            download_total_bytes: None,
            total_rows: None,
            total_file_rows: None,
            processed_rows: None,
            skipped_rows: 0,
            error_count: 0,
            validation_status: None,
            validation_message: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Same source, kind, entry and filters
    pub fn same_submission(&self, other: &ImportJob) -> bool {
        self.source == other.source
            && self.kind == other.kind
            && self.entry_name == other.entry_name
            && self.filters == other.filters
    }

    /// Rows inserted as a share of the pre-counted total, 0..=100
    pub fn percent(&self) -> f64 {
        match (self.processed_rows, self.total_rows) {
            (Some(done), Some(total)) if total > 0 => {
                (done as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
            },
            _ => 0.0,
        }
    }

    /// Clear everything a run produced, ready for a fresh attempt
    pub fn reset_progress(&mut self) {
        self.stage = None;
        self.schema_variant = None;
        self.downloaded_bytes = 0;
        self.download_total_bytes = None;
        self.total_rows = None;
        self.total_file_rows = None;
        self.processed_rows = None;
        self.skipped_rows = 0;
        self.error_count = 0;
        self.validation_status = None;
        self.validation_message = None;
        self.error_message = None;
        self.started_at = None;
        self.completed_at = None;
    }
}

/// Fields written together with a status transition
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub stage: Option<String>,
    pub error_message: Option<String>,
    pub schema_variant: Option<SchemaVariant>,
    pub total_rows: Option<i64>,
    pub mark_started: bool,
    pub mark_completed: bool,
}

impl JobPatch {
    pub fn stage(stage: impl Into<String>) -> Self {
        Self {
            stage: Some(stage.into()),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            mark_completed: true,
            ..Self::default()
        }
    }

    /// Apply to an in-memory job (status excluded)
    pub fn apply(&self, job: &mut ImportJob, now: DateTime<Utc>) {
        if let Some(stage) = &self.stage {
            job.stage = Some(stage.clone());
        }
        if let Some(message) = &self.error_message {
            job.error_message = Some(message.clone());
        }
        if let Some(variant) = self.schema_variant {
            job.schema_variant = Some(variant);
        }
        if let Some(total) = self.total_rows {
            job.total_rows = Some(total);
        }
        if self.mark_started && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if self.mark_completed {
            job.completed_at = Some(now);
        }
    }
}

/// Row counters persisted during processing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub total_file_rows: i64,
    pub processed_rows: i64,
    pub skipped_rows: i64,
    pub error_count: i64,
}

/// Import batch (maps to import_batches table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: Uuid,
    pub job_id: Uuid,
    pub batch_index: i32,
    pub first_line: i64,
    pub last_line: i64,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub inserted_rows: i64,
    pub skipped_rows: i64,
    pub error_count: i64,
    pub status: BatchStatus,
    pub error_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportBatch {
    pub fn new(job_id: Uuid, batch_index: i32, first_line: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_id,
            batch_index,
            first_line,
            last_line: first_line,
            total_rows: 0,
            processed_rows: 0,
            inserted_rows: 0,
            skipped_rows: 0,
            error_count: 0,
            status: BatchStatus::Processing,
            error_summary: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Final or intermediate batch outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchUpdate {
    pub status: BatchStatus,
    pub last_line: i64,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub inserted_rows: i64,
    pub skipped_rows: i64,
    pub error_count: i64,
    pub error_summary: Option<String>,
}

/// Snapshot of a row from a failed batch (maps to import_batch_rows)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBatchRow {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub row_number: i64,
    pub status: BatchRowStatus,
    pub payload: serde_json::Value,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Diagnostic log entry (maps to import_errors)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportErrorEntry {
    pub id: Uuid,
    pub job_id: Uuid,
    pub row_number: Option<i64>,
    pub error_type: String,
    pub message: String,
    pub raw_data: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ImportErrorEntry {
    pub fn new(
        job_id: Uuid,
        row_number: Option<i64>,
        error_type: &str,
        message: impl Into<String>,
        raw_data: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            row_number,
            error_type: error_type.to_string(),
            message: message.into(),
            raw_data: raw_data.map(|raw| crate::ingest::source::decoder::truncate_chars(
                &raw,
                crate::ingest::source::decoder::MAX_RAW_SNIPPET_CHARS,
            )),
            created_at: Utc::now(),
        }
    }
}

/// One integrity check (maps to validation_runs)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRun {
    pub id: Uuid,
    pub job_id: Uuid,
    pub is_valid: bool,
    pub db_row_count: i64,
    pub expected_count: i64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// A discrepancy found by a validation run (maps to validation_issues)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub id: Uuid,
    pub run_id: Uuid,
    pub job_id: Uuid,
    pub issue_type: String,
    pub severity: String,
    pub status: IssueStatus,
    pub message: String,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Result of an integrity check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub is_valid: bool,
    pub db_row_count: i64,
    pub expected_count: i64,
    pub message: String,
}

/// Snapshot of the in-memory queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub is_processing: bool,
    pub current_job_id: Option<Uuid>,
    pub queue_length: usize,
    pub ordered_queue: Vec<Uuid>,
}

/// Outcome of replaying a failed batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReprocessSummary {
    pub batch_id: Uuid,
    pub replayed: i64,
    pub inserted: i64,
    pub skipped: i64,
    pub failed: i64,
    pub status: BatchStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_and_classes() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("storing".parse::<JobStatus>().is_err());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(JobStatus::Extracting.is_in_progress());
        assert!(!JobStatus::Pending.is_in_progress());
    }

    #[test]
    fn test_source_parts_round_trip() {
        let source = ImportSource::Remote {
            url: "https://cdn.tse.jus.br/x/votacao_partido_munzona_2022.zip".into(),
        };
        let back = ImportSource::from_parts(source.source_type(), source.location()).unwrap();
        assert_eq!(back, source);
        assert_eq!(source.file_name(), "votacao_partido_munzona_2022.zip");
    }

    #[test]
    fn test_percent_uses_inserted_rows_over_estimate() {
        let mut job = ImportJob::new(
            ImportSource::Upload {
                path: "/data/votacao_candidato_munzona_2022.zip".into(),
            },
            RecordKind::CandidateVotes,
            None,
            ImportFilters::default(),
        );
        assert_eq!(job.percent(), 0.0);
        job.total_rows = Some(200);
        job.processed_rows = Some(50);
        assert_eq!(job.percent(), 25.0);
    }

    #[test]
    fn test_same_submission_compares_filters() {
        let source = ImportSource::Remote {
            url: "https://cdn.tse.jus.br/a.zip".into(),
        };
        let a = ImportJob::new(source.clone(), RecordKind::PartyVotes, None, ImportFilters::default());
        let mut b = ImportJob::new(source, RecordKind::PartyVotes, None, ImportFilters::default());
        assert!(a.same_submission(&b));
        b.filters.year = Some(2022);
        assert!(!a.same_submission(&b));
    }

    #[test]
    fn test_error_entry_raw_data_is_bounded() {
        let entry = ImportErrorEntry::new(Uuid::new_v4(), Some(3), "parse", "bad", Some("x".repeat(900)));
        assert_eq!(entry.raw_data.unwrap().len(), 500);
    }
}
