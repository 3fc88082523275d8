//! Import pipeline error types

use thiserror::Error;
use uuid::Uuid;

use crate::ingest::source::schema::SchemaError;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised by the import pipeline and its service surface
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Remote archive could not be fetched
    #[error("Transport error: {0}")]
    Transport(String),

    /// Archive contents are not what the pipeline expects
    #[error("Format error: {0}")]
    Format(String),

    #[error("Import cancelled")]
    Cancelled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("An import for this source already exists (job {existing_job_id})")]
    DuplicateJob { existing_job_id: Uuid },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    /// Short machine-readable kind, stored alongside diagnostic entries
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Database(_) => "database",
            PipelineError::Io(_) => "io",
            PipelineError::Http(_) | PipelineError::Transport(_) => "transport",
            PipelineError::Archive(_) | PipelineError::Format(_) => "format",
            PipelineError::Csv(_) => "parse",
            PipelineError::Serialization(_) => "serialization",
            PipelineError::Schema(_) => "schema",
            PipelineError::Cancelled => "cancelled",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::InvalidState(_) => "invalid_state",
            PipelineError::Validation(_) => "validation",
            PipelineError::DuplicateJob { .. } => "duplicate_job",
            PipelineError::Config(_) => "config",
            PipelineError::Internal(_) => "internal",
        }
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Internal(format!("Background task failed: {}", err))
    }
}
