//! Vote-count import pipeline
//!
//! # Architecture
//!
//! - **source**: archive fetch, entry extraction, layout resolution, row decoding
//! - **engine**: batched inserts with the party-row dedup guard
//! - **state**: allowed job status transitions
//! - **queue**: single-worker FIFO with per-job cancellation tokens
//! - **pipeline**: drives one job through every stage
//! - **reprocess**: row-by-row replay of failed batches
//! - **validator**: stored-row integrity checks
//! - **maintenance**: post-import statistics refresh and hooks

pub mod engine;
pub mod maintenance;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod reprocess;
pub mod source;
pub mod state;
pub mod validator;

pub use engine::{BatchEngine, DedupGuard, EngineOutcome};
pub use maintenance::{LoggingHook, Maintenance, PostImportHook};
pub use models::{
    BatchRowStatus, BatchStatus, ImportBatch, ImportBatchRow, ImportErrorEntry, ImportJob,
    ImportRequest, ImportSource, IntegrityReport, IssueStatus, JobStatus, QueueStatus,
    ReprocessSummary, ValidationIssue, ValidationRun, ValidationStatus,
};
pub use pipeline::ImportPipeline;
pub use queue::{ImportQueue, JobRunner};
pub use reprocess::Reprocessor;
pub use validator::Validator;
