//! Batch engine
//!
//! Consumes decoded rows in source order, filters and de-duplicates them,
//! and writes them in fixed-size batches. A batch whose bulk insert fails is
//! kept as row snapshots for later reprocessing; the job carries on.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{
    BatchRowStatus, BatchStatus, BatchUpdate, ImportBatch, ImportBatchRow, ImportErrorEntry,
    ImportJob, JobCounters,
};
use super::source::records::PartyKey;
use super::source::{DecodedRow, ParsedRow, RecordKind, VoteRecord};
use crate::error::{PipelineError, Result};
use crate::events::{EventBroadcaster, ImportEvent};
use crate::store::ImportStore;

/// Diagnostic type for rows the decoder rejected
pub const PARSE_ERROR: &str = "parse";
/// Diagnostic type for a failed bulk insert
pub const BATCH_INSERT_ERROR: &str = "batch_insert";

/// Drops repeated party rows within one job
///
/// Candidate rows rely on the storage natural key instead.
#[derive(Debug)]
pub struct DedupGuard {
    seen: Option<HashSet<PartyKey>>,
}

impl DedupGuard {
    pub fn new(kind: RecordKind) -> Self {
        let seen = match kind {
            RecordKind::PartyVotes => Some(HashSet::new()),
            RecordKind::CandidateVotes => None,
        };
        Self { seen }
    }

    /// True the first time a key is seen
    pub fn admit(&mut self, record: &VoteRecord) -> bool {
        match (&mut self.seen, record.party_key()) {
            (Some(seen), Some(key)) => seen.insert(key),
            _ => true,
        }
    }
}

/// Totals of one engine run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutcome {
    pub counters: JobCounters,
    pub batches: i32,
    pub failed_batches: i32,
}

pub struct BatchEngine {
    store: Arc<dyn ImportStore>,
    events: EventBroadcaster,
    batch_size: usize,
    progress_every_batches: usize,
}

impl BatchEngine {
    pub fn new(
        store: Arc<dyn ImportStore>,
        events: EventBroadcaster,
        batch_size: usize,
        progress_every_batches: usize,
    ) -> Self {
        Self {
            store,
            events,
            batch_size: batch_size.max(1),
            progress_every_batches: progress_every_batches.max(1),
        }
    }

    /// Drain `rows` into storage for `job`
    ///
    /// Returns [`PipelineError::Cancelled`] when `cancel` fires before a new
    /// batch is opened; counters gathered so far are persisted first.
    pub async fn run(
        &self,
        job: &ImportJob,
        mut rows: mpsc::Receiver<DecodedRow>,
        cancel: &CancellationToken,
    ) -> Result<EngineOutcome> {
        let mut outcome = EngineOutcome::default();
        let mut guard = DedupGuard::new(job.kind);
        let mut pending: Vec<ParsedRow> = Vec::with_capacity(self.batch_size);
        let mut open_batch: Option<ImportBatch> = None;
        let mut parse_errors: Vec<ImportErrorEntry> = Vec::new();

        while let Some(decoded) = rows.recv().await {
            outcome.counters.total_file_rows += 1;

            let row = match decoded {
                Ok(row) => row,
                Err(failure) => {
                    debug!(job_id = %job.id, line = failure.line, error = %failure.error, "Row rejected");
                    outcome.counters.error_count += 1;
                    parse_errors.push(ImportErrorEntry::new(
                        job.id,
                        Some(failure.line as i64),
                        PARSE_ERROR,
                        failure.error.to_string(),
                        Some(failure.raw),
                    ));
                    if parse_errors.len() >= self.batch_size {
                        self.store.insert_errors(&parse_errors).await?;
                        parse_errors.clear();
                    }
                    continue;
                },
            };

            if !job.filters.matches(&row.record) || !guard.admit(&row.record) {
                outcome.counters.skipped_rows += 1;
                continue;
            }

            if open_batch.is_none() {
                if cancel.is_cancelled() {
                    self.store.insert_errors(&parse_errors).await?;
                    self.store.update_job_progress(job.id, &outcome.counters).await?;
                    return Err(PipelineError::Cancelled);
                }
                let batch = ImportBatch::new(job.id, outcome.batches, row.line as i64);
                self.store.insert_batch(&batch).await?;
                open_batch = Some(batch);
            }

            pending.push(row);

            if pending.len() >= self.batch_size {
                if let Some(batch) = open_batch.take() {
                    let rows = std::mem::replace(&mut pending, Vec::with_capacity(self.batch_size));
                    self.flush(job, batch, rows, &mut outcome).await?;
                }
                if !parse_errors.is_empty() {
                    self.store.insert_errors(&parse_errors).await?;
                    parse_errors.clear();
                }
                if outcome.batches as usize % self.progress_every_batches == 0 {
                    self.persist_progress(job, &outcome.counters).await?;
                }
                tokio::task::yield_now().await;
            }
        }

        if let Some(batch) = open_batch.take() {
            let rows = std::mem::take(&mut pending);
            self.flush(job, batch, rows, &mut outcome).await?;
        }
        self.store.insert_errors(&parse_errors).await?;
        self.persist_progress(job, &outcome.counters).await?;

        info!(
            job_id = %job.id,
            rows = outcome.counters.total_file_rows,
            inserted = outcome.counters.processed_rows,
            skipped = outcome.counters.skipped_rows,
            errors = outcome.counters.error_count,
            batches = outcome.batches,
            failed_batches = outcome.failed_batches,
            "Rows processed"
        );

        Ok(outcome)
    }

    async fn flush(
        &self,
        job: &ImportJob,
        mut batch: ImportBatch,
        rows: Vec<ParsedRow>,
        outcome: &mut EngineOutcome,
    ) -> Result<()> {
        let size = rows.len() as i64;
        let last_line = rows.last().map(|r| r.line as i64).unwrap_or(batch.first_line);
        let records: Vec<VoteRecord> = rows.iter().map(|r| r.record.clone()).collect();

        let update = match self.store.insert_records(job.id, &records).await {
            Ok(inserted) => {
                let inserted = inserted as i64;
                outcome.counters.processed_rows += inserted;
                outcome.counters.skipped_rows += size - inserted;
                debug!(job_id = %job.id, batch_index = batch.batch_index, inserted, "Batch stored");
                BatchUpdate {
                    status: BatchStatus::Completed,
                    last_line,
                    total_rows: size,
                    processed_rows: size,
                    inserted_rows: inserted,
                    skipped_rows: size - inserted,
                    error_count: 0,
                    error_summary: None,
                }
            },
            Err(err) => {
                let message = err.to_string();
                warn!(
                    job_id = %job.id,
                    batch_index = batch.batch_index,
                    rows = size,
                    error = %message,
                    "Batch insert failed; keeping row snapshots"
                );
                self.keep_snapshots(batch.id, &rows, &message).await?;
                self.store
                    .insert_errors(&[ImportErrorEntry::new(
                        job.id,
                        Some(batch.first_line),
                        BATCH_INSERT_ERROR,
                        format!("Batch {} insert failed: {}", batch.batch_index, message),
                        None,
                    )])
                    .await?;
                self.events.publish(ImportEvent::BatchError {
                    job_id: job.id,
                    batch_id: batch.id,
                    batch_index: batch.batch_index,
                    message: message.clone(),
                });
                outcome.counters.error_count += size;
                outcome.failed_batches += 1;
                BatchUpdate {
                    status: BatchStatus::Failed,
                    last_line,
                    total_rows: size,
                    processed_rows: size,
                    inserted_rows: 0,
                    skipped_rows: 0,
                    error_count: size,
                    error_summary: Some(message),
                }
            },
        };

        self.store.update_batch(batch.id, &update).await?;
        apply_update(&mut batch, &update);
        self.events.publish(ImportEvent::batch_status(&batch));
        outcome.batches += 1;

        Ok(())
    }

    async fn keep_snapshots(&self, batch_id: Uuid, rows: &[ParsedRow], message: &str) -> Result<()> {
        let now = chrono::Utc::now();
        let snapshots = rows
            .iter()
            .map(|row| {
                Ok(ImportBatchRow {
                    id: Uuid::new_v4(),
                    batch_id,
                    row_number: row.line as i64,
                    status: BatchRowStatus::Failed,
                    payload: serde_json::to_value(&row.record)?,
                    error_message: Some(message.to_string()),
                    updated_at: now,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.store.insert_batch_rows(&snapshots).await
    }

    async fn persist_progress(&self, job: &ImportJob, counters: &JobCounters) -> Result<()> {
        self.store.update_job_progress(job.id, counters).await?;

        let mut snapshot = job.clone();
        snapshot.total_file_rows = Some(counters.total_file_rows);
        snapshot.processed_rows = Some(counters.processed_rows);
        snapshot.skipped_rows = counters.skipped_rows;
        snapshot.error_count = counters.error_count;
        self.events.publish(ImportEvent::progress(&snapshot));

        Ok(())
    }
}

pub(crate) fn apply_update(batch: &mut ImportBatch, update: &BatchUpdate) {
    batch.status = update.status;
    batch.last_line = update.last_line;
    batch.total_rows = update.total_rows;
    batch.processed_rows = update.processed_rows;
    batch.inserted_rows = update.inserted_rows;
    batch.skipped_rows = update.skipped_rows;
    batch.error_count = update.error_count;
    batch.error_summary = update.error_summary.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::models::ImportSource;
    use crate::ingest::source::{ImportFilters, PartyVote, RowError, RowFailure};
    use crate::store::MemoryImportStore;

    fn party(number: i64, year: i64) -> VoteRecord {
        VoteRecord::Party(PartyVote {
            election_year: year,
            round: 1,
            election_code: None,
            state: "RJ".into(),
            municipality_code: 60011,
            municipality_name: None,
            zone: 4,
            role_code: 6,
            role_name: None,
            party_number: number,
            party_acronym: None,
            nominal_votes: 100,
            legend_votes: 7,
        })
    }

    fn job(filters: ImportFilters) -> ImportJob {
        ImportJob::new(
            ImportSource::Upload {
                path: "/tmp/votacao_partido_munzona_2022.zip".into(),
            },
            RecordKind::PartyVotes,
            None,
            filters,
        )
    }

    async fn run_engine(
        store: Arc<MemoryImportStore>,
        job: &ImportJob,
        batch_size: usize,
        rows: Vec<DecodedRow>,
    ) -> Result<EngineOutcome> {
        store.insert_job(job).await.unwrap();
        let engine = BatchEngine::new(store, EventBroadcaster::new(64), batch_size, 5);
        let (tx, rx) = mpsc::channel(rows.len().max(1));
        for row in rows {
            tx.send(row).await.unwrap();
        }
        drop(tx);
        engine.run(job, rx, &CancellationToken::new()).await
    }

    fn ok(line: u64, record: VoteRecord) -> DecodedRow {
        Ok(ParsedRow { line, record })
    }

    #[test]
    fn test_dedup_guard_only_applies_to_party_rows() {
        let mut guard = DedupGuard::new(RecordKind::PartyVotes);
        assert!(guard.admit(&party(13, 2022)));
        assert!(!guard.admit(&party(13, 2022)));
        assert!(guard.admit(&party(45, 2022)));

        let mut guard = DedupGuard::new(RecordKind::CandidateVotes);
        assert!(guard.admit(&party(13, 2022)));
        assert!(guard.admit(&party(13, 2022)));
    }

    #[tokio::test]
    async fn test_batches_split_at_batch_size() {
        let store = Arc::new(MemoryImportStore::new());
        let job = job(ImportFilters::default());
        let rows = (0..5).map(|i| ok(i + 2, party(10 + i as i64, 2022))).collect();

        let outcome = run_engine(store.clone(), &job, 2, rows).await.unwrap();
        assert_eq!(outcome.batches, 3);
        assert_eq!(outcome.counters.processed_rows, 5);

        let batches = store.list_batches(job.id).await.unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].first_line, 6);
        assert_eq!(batches[2].total_rows, 1);
        for batch in &batches {
            assert_eq!(batch.status, BatchStatus::Completed);
            assert_eq!(
                batch.processed_rows,
                batch.inserted_rows + batch.skipped_rows + batch.error_count
            );
        }
    }

    #[tokio::test]
    async fn test_filters_duplicates_and_parse_errors_are_counted() {
        let store = Arc::new(MemoryImportStore::new());
        let job = job(ImportFilters {
            year: Some(2022),
            ..ImportFilters::default()
        });
        let rows = vec![
            ok(2, party(13, 2022)),
            ok(3, party(13, 2022)),
            ok(4, party(45, 2018)),
            Err(RowFailure {
                line: 5,
                error: RowError::Malformed("unterminated quote".into()),
                raw: "\"2022;1".into(),
            }),
            ok(6, party(45, 2022)),
        ];

        let outcome = run_engine(store.clone(), &job, 10, rows).await.unwrap();
        assert_eq!(
            outcome.counters,
            JobCounters {
                total_file_rows: 5,
                processed_rows: 2,
                skipped_rows: 2,
                error_count: 1,
            }
        );

        let errors = store.list_errors(job.id).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].row_number, Some(5));
        assert_eq!(errors[0].error_type, PARSE_ERROR);

        let persisted = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(persisted.processed_rows, Some(2));
    }

    #[tokio::test]
    async fn test_failed_insert_keeps_snapshots() {
        let store = Arc::new(MemoryImportStore::new());
        store
            .fail_inserts_when(|r| matches!(r, VoteRecord::Party(p) if p.party_number == 99))
            .await;
        let job = job(ImportFilters::default());
        let rows = vec![
            ok(2, party(10, 2022)),
            ok(3, party(11, 2022)),
            ok(4, party(99, 2022)),
            ok(5, party(12, 2022)),
        ];

        let outcome = run_engine(store.clone(), &job, 2, rows).await.unwrap();
        assert_eq!(outcome.failed_batches, 1);
        assert_eq!(outcome.counters.processed_rows, 2);
        assert_eq!(outcome.counters.error_count, 2);

        let batches = store.list_batches(job.id).await.unwrap();
        assert_eq!(batches[1].status, BatchStatus::Failed);
        assert_eq!(batches[1].error_count, 2);

        let snapshots = store.list_batch_rows(batches[1].id).await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].row_number, 4);
        let record: VoteRecord = serde_json::from_value(snapshots[0].payload.clone()).unwrap();
        assert_eq!(record, party(99, 2022));

        let errors = store.list_errors(job.id).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, BATCH_INSERT_ERROR);
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_batch() {
        let store = Arc::new(MemoryImportStore::new());
        let job = job(ImportFilters::default());
        store.insert_job(&job).await.unwrap();
        let engine = BatchEngine::new(store.clone(), EventBroadcaster::new(16), 1, 5);

        let (tx, rx) = mpsc::channel(4);
        tx.send(ok(2, party(1, 2022))).await.unwrap();
        tx.send(ok(3, party(2, 2022))).await.unwrap();
        drop(tx);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine.run(&job, rx, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(store.list_batches(job.id).await.unwrap().is_empty());
    }
}
