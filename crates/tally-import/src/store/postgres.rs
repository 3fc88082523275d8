//! PostgreSQL [`ImportStore`] backed by sqlx

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::ImportStore;
use crate::error::{PipelineError, Result};
use crate::ingest::models::{
    BatchRowStatus, BatchUpdate, ImportBatch, ImportBatchRow, ImportErrorEntry, ImportJob,
    ImportSource, IssueStatus, JobCounters, JobPatch, JobStatus, ValidationIssue, ValidationRun,
    ValidationStatus,
};
use crate::ingest::source::{
    CandidateVote, ImportFilters, PartyVote, RecordKind, SchemaVariant, VoteRecord,
};

/// Postgres caps a statement at 65535 bind parameters
const MAX_BIND_PARAMS: usize = 65_535;
const CANDIDATE_COLUMNS: usize = 19;
const PARTY_COLUMNS: usize = 14;

const JOB_COLUMNS: &str = r#"
    id, source_type, source_location, entry_name, record_kind,
    filter_year, filter_state, filter_role_code, status, stage, schema_variant,
    downloaded_bytes, download_total_bytes, total_rows, total_file_rows,
    processed_rows, skipped_rows, error_count, validation_status,
    validation_message, error_message, created_at, updated_at, started_at,
    completed_at
"#;

const BATCH_COLUMNS: &str = r#"
    id, job_id, batch_index, first_line, last_line, total_rows, processed_rows,
    inserted_rows, skipped_rows, error_count, status, error_summary,
    created_at, updated_at, completed_at
"#;

/// Production store
#[derive(Clone)]
pub struct PgImportStore {
    pool: PgPool,
}

impl PgImportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply embedded migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PipelineError::Database(e.into()))?;
        Ok(())
    }

    fn table(kind: RecordKind) -> &'static str {
        match kind {
            RecordKind::CandidateVotes => "candidate_votes",
            RecordKind::PartyVotes => "party_votes",
        }
    }
}

fn status_strings(statuses: &[JobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

async fn insert_candidates(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    job_id: Uuid,
    votes: &[&CandidateVote],
) -> Result<u64> {
    let mut inserted = 0;
    for chunk in votes.chunks(MAX_BIND_PARAMS / CANDIDATE_COLUMNS) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO candidate_votes (job_id, election_year, round, election_code, state, \
             municipality_code, municipality_name, zone, role_code, role_name, candidate_seq, \
             candidate_number, candidate_name, ballot_name, party_number, party_acronym, \
             result_status, nominal_votes, valid_nominal_votes) ",
        );
        builder.push_values(chunk, |mut row, vote| {
            row.push_bind(job_id)
                .push_bind(vote.election_year)
                .push_bind(vote.round)
                .push_bind(vote.election_code)
                .push_bind(vote.state.clone())
                .push_bind(vote.municipality_code)
                .push_bind(vote.municipality_name.clone())
                .push_bind(vote.zone)
                .push_bind(vote.role_code)
                .push_bind(vote.role_name.clone())
                .push_bind(vote.candidate_seq)
                .push_bind(vote.candidate_number)
                .push_bind(vote.candidate_name.clone())
                .push_bind(vote.ballot_name.clone())
                .push_bind(vote.party_number)
                .push_bind(vote.party_acronym.clone())
                .push_bind(vote.result_status.clone())
                .push_bind(vote.nominal_votes)
                .push_bind(vote.valid_nominal_votes);
        });
        builder.push(" ON CONFLICT ON CONSTRAINT candidate_votes_natural_key DO NOTHING");
        inserted += builder.build().execute(&mut **tx).await?.rows_affected();
    }
    Ok(inserted)
}

async fn insert_parties(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    job_id: Uuid,
    votes: &[&PartyVote],
) -> Result<u64> {
    let mut inserted = 0;
    for chunk in votes.chunks(MAX_BIND_PARAMS / PARTY_COLUMNS) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO party_votes (job_id, election_year, round, election_code, state, \
             municipality_code, municipality_name, zone, role_code, role_name, party_number, \
             party_acronym, nominal_votes, legend_votes) ",
        );
        builder.push_values(chunk, |mut row, vote| {
            row.push_bind(job_id)
                .push_bind(vote.election_year)
                .push_bind(vote.round)
                .push_bind(vote.election_code)
                .push_bind(vote.state.clone())
                .push_bind(vote.municipality_code)
                .push_bind(vote.municipality_name.clone())
                .push_bind(vote.zone)
                .push_bind(vote.role_code)
                .push_bind(vote.role_name.clone())
                .push_bind(vote.party_number)
                .push_bind(vote.party_acronym.clone())
                .push_bind(vote.nominal_votes)
                .push_bind(vote.legend_votes);
        });
        inserted += builder.build().execute(&mut **tx).await?.rows_affected();
    }
    Ok(inserted)
}

#[async_trait]
impl ImportStore for PgImportStore {
    async fn insert_job(&self, job: &ImportJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO import_jobs (
                id, source_type, source_location, entry_name, record_kind,
                filter_year, filter_state, filter_role_code, status, stage,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(job.id)
        .bind(job.source.source_type())
        .bind(job.source.location())
        .bind(&job.entry_name)
        .bind(job.kind.as_str())
        .bind(job.filters.year)
        .bind(&job.filters.state)
        .bind(job.filters.role_code)
        .bind(job.status.as_str())
        .bind(&job.stage)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ImportJob>> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {} FROM import_jobs WHERE id = $1", JOB_COLUMNS))
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(ImportJob::try_from).transpose()
    }

    async fn jobs_with_status(&self, statuses: &[JobStatus]) -> Result<Vec<ImportJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM import_jobs WHERE status = ANY($1) ORDER BY created_at, id",
            JOB_COLUMNS
        ))
        .bind(status_strings(statuses))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ImportJob::try_from).collect()
    }

    async fn jobs_for_source(&self, source: &ImportSource) -> Result<Vec<ImportJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM import_jobs WHERE source_type = $1 AND source_location = $2 \
             ORDER BY created_at, id",
            JOB_COLUMNS
        ))
        .bind(source.source_type())
        .bind(source.location())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ImportJob::try_from).collect()
    }

    async fn transition_job(
        &self,
        job_id: Uuid,
        to: JobStatus,
        from: &[JobStatus],
        patch: &JobPatch,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = $2,
                stage = COALESCE($3, stage),
                error_message = COALESCE($4, error_message),
                schema_variant = COALESCE($5, schema_variant),
                total_rows = COALESCE($6, total_rows),
                started_at = CASE WHEN $7 AND started_at IS NULL THEN NOW() ELSE started_at END,
                completed_at = CASE WHEN $8 THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($9)
            "#,
        )
        .bind(job_id)
        .bind(to.as_str())
        .bind(&patch.stage)
        .bind(&patch.error_message)
        .bind(patch.schema_variant.map(|v| v.as_str()))
        .bind(patch.total_rows)
        .bind(patch.mark_started)
        .bind(patch.mark_completed)
        .bind(status_strings(from))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_download_progress(
        &self,
        job_id: Uuid,
        downloaded_bytes: i64,
        total_bytes: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE import_jobs
            SET downloaded_bytes = $2,
                download_total_bytes = COALESCE($3, download_total_bytes),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(downloaded_bytes)
        .bind(total_bytes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_job_progress(&self, job_id: Uuid, counters: &JobCounters) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE import_jobs
            SET total_file_rows = $2,
                processed_rows = $3,
                skipped_rows = $4,
                error_count = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(counters.total_file_rows)
        .bind(counters.processed_rows)
        .bind(counters.skipped_rows)
        .bind(counters.error_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn adjust_job_counters(
        &self,
        job_id: Uuid,
        processed_delta: i64,
        skipped_delta: i64,
        error_delta: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE import_jobs
            SET processed_rows = COALESCE(processed_rows, 0) + $2,
                skipped_rows = skipped_rows + $3,
                error_count = GREATEST(error_count + $4, 0),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(processed_delta)
        .bind(skipped_delta)
        .bind(error_delta)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_job_validation(
        &self,
        job_id: Uuid,
        status: ValidationStatus,
        message: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE import_jobs
            SET validation_status = $2, validation_message = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reset_job(&self, job_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let reset = sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = 'pending', stage = NULL, schema_variant = NULL,
                downloaded_bytes = 0, download_total_bytes = NULL,
                total_rows = NULL, total_file_rows = NULL, processed_rows = NULL,
                skipped_rows = 0, error_count = 0,
                validation_status = NULL, validation_message = NULL,
                error_message = NULL, started_at = NULL, completed_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('failed', 'cancelled')
            "#,
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        if reset.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        // Batch rows and validation issues cascade from their parents
        for table in [
            "import_batches",
            "import_errors",
            "validation_runs",
            "candidate_votes",
            "party_votes",
        ] {
            sqlx::query(&format!("DELETE FROM {} WHERE job_id = $1", table))
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn delete_job(&self, job_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM import_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_batch(&self, batch: &ImportBatch) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO import_batches (
                id, job_id, batch_index, first_line, last_line, total_rows,
                processed_rows, inserted_rows, skipped_rows, error_count, status,
                error_summary, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(batch.id)
        .bind(batch.job_id)
        .bind(batch.batch_index)
        .bind(batch.first_line)
        .bind(batch.last_line)
        .bind(batch.total_rows)
        .bind(batch.processed_rows)
        .bind(batch.inserted_rows)
        .bind(batch.skipped_rows)
        .bind(batch.error_count)
        .bind(batch.status.as_str())
        .bind(&batch.error_summary)
        .bind(batch.created_at)
        .bind(batch.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_batch(&self, batch_id: Uuid, update: &BatchUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE import_batches
            SET status = $2, last_line = $3, total_rows = $4, processed_rows = $5,
                inserted_rows = $6, skipped_rows = $7, error_count = $8,
                error_summary = $9, updated_at = NOW(),
                completed_at = CASE WHEN $2 IN ('completed', 'failed') THEN NOW() END
            WHERE id = $1
            "#,
        )
        .bind(batch_id)
        .bind(update.status.as_str())
        .bind(update.last_line)
        .bind(update.total_rows)
        .bind(update.processed_rows)
        .bind(update.inserted_rows)
        .bind(update.skipped_rows)
        .bind(update.error_count)
        .bind(&update.error_summary)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<ImportBatch>> {
        let row: Option<BatchRow> =
            sqlx::query_as(&format!("SELECT {} FROM import_batches WHERE id = $1", BATCH_COLUMNS))
                .bind(batch_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(ImportBatch::try_from).transpose()
    }

    async fn list_batches(&self, job_id: Uuid) -> Result<Vec<ImportBatch>> {
        let rows: Vec<BatchRow> = sqlx::query_as(&format!(
            "SELECT {} FROM import_batches WHERE job_id = $1 ORDER BY batch_index",
            BATCH_COLUMNS
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ImportBatch::try_from).collect()
    }

    async fn insert_batch_rows(&self, rows: &[ImportBatchRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(MAX_BIND_PARAMS / 7) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO import_batch_rows \
                 (id, batch_id, row_number, status, payload, error_message, updated_at) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.id)
                    .push_bind(row.batch_id)
                    .push_bind(row.row_number)
                    .push_bind(row.status.as_str())
                    .push_bind(row.payload.clone())
                    .push_bind(row.error_message.clone())
                    .push_bind(row.updated_at);
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn list_batch_rows(&self, batch_id: Uuid) -> Result<Vec<ImportBatchRow>> {
        let rows: Vec<BatchRowRecord> = sqlx::query_as(
            r#"
            SELECT id, batch_id, row_number, status, payload, error_message, updated_at
            FROM import_batch_rows
            WHERE batch_id = $1
            ORDER BY row_number
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ImportBatchRow::try_from).collect()
    }

    async fn update_batch_row(
        &self,
        row_id: Uuid,
        status: BatchRowStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE import_batch_rows SET status = $2, error_message = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(row_id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reset_batch_rows(&self, batch_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE import_batch_rows
            SET status = 'pending', error_message = NULL, updated_at = NOW()
            WHERE batch_id = $1 AND status <> 'success'
            "#,
        )
        .bind(batch_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_errors(&self, errors: &[ImportErrorEntry]) -> Result<()> {
        if errors.is_empty() {
            return Ok(());
        }

        for chunk in errors.chunks(MAX_BIND_PARAMS / 7) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO import_errors \
                 (id, job_id, row_number, error_type, message, raw_data, created_at) ",
            );
            builder.push_values(chunk, |mut b, entry| {
                b.push_bind(entry.id)
                    .push_bind(entry.job_id)
                    .push_bind(entry.row_number)
                    .push_bind(entry.error_type.clone())
                    .push_bind(entry.message.clone())
                    .push_bind(entry.raw_data.clone())
                    .push_bind(entry.created_at);
            });
            builder.build().execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn list_errors(&self, job_id: Uuid) -> Result<Vec<ImportErrorEntry>> {
        let rows: Vec<ErrorRow> = sqlx::query_as(
            r#"
            SELECT id, job_id, row_number, error_type, message, raw_data, created_at
            FROM import_errors
            WHERE job_id = $1
            ORDER BY row_number NULLS LAST, created_at
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ImportErrorEntry::from).collect())
    }

    async fn insert_validation_run(&self, run: &ValidationRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO validation_runs
                (id, job_id, is_valid, db_row_count, expected_count, message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(run.id)
        .bind(run.job_id)
        .bind(run.is_valid)
        .bind(run.db_row_count)
        .bind(run.expected_count)
        .bind(&run.message)
        .bind(run.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_validation_issue(&self, issue: &ValidationIssue) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO validation_issues
                (id, run_id, job_id, issue_type, severity, status, message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(issue.id)
        .bind(issue.run_id)
        .bind(issue.job_id)
        .bind(&issue.issue_type)
        .bind(&issue.severity)
        .bind(issue.status.as_str())
        .bind(&issue.message)
        .bind(issue.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_validation_runs(&self, job_id: Uuid) -> Result<Vec<ValidationRun>> {
        let rows: Vec<ValidationRunRow> = sqlx::query_as(
            r#"
            SELECT id, job_id, is_valid, db_row_count, expected_count, message, created_at
            FROM validation_runs
            WHERE job_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ValidationRun::from).collect())
    }

    async fn list_validation_issues(&self, job_id: Uuid) -> Result<Vec<ValidationIssue>> {
        let rows: Vec<ValidationIssueRow> = sqlx::query_as(
            r#"
            SELECT id, run_id, job_id, issue_type, severity, status, message,
                   resolved_by, resolved_at, created_at
            FROM validation_issues
            WHERE job_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ValidationIssue::try_from).collect()
    }

    async fn resolve_issue(
        &self,
        issue_id: Uuid,
        status: IssueStatus,
        resolved_by: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE validation_issues
            SET status = $2, resolved_by = $3, resolved_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(issue_id)
        .bind(status.as_str())
        .bind(resolved_by)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_records(&self, job_id: Uuid, records: &[VoteRecord]) -> Result<u64> {
        let mut candidates = Vec::new();
        let mut parties = Vec::new();
        for record in records {
            match record {
                VoteRecord::Candidate(vote) => candidates.push(vote),
                VoteRecord::Party(vote) => parties.push(vote),
            }
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        if !candidates.is_empty() {
            inserted += insert_candidates(&mut tx, job_id, &candidates).await?;
        }
        if !parties.is_empty() {
            inserted += insert_parties(&mut tx, job_id, &parties).await?;
        }
        tx.commit().await?;

        Ok(inserted)
    }

    async fn count_records(&self, job_id: Uuid, kind: RecordKind) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE job_id = $1",
            Self::table(kind)
        ))
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn refresh_statistics(&self, kind: RecordKind) -> Result<()> {
        sqlx::query(&format!("ANALYZE {}", Self::table(kind)))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// Helper structs for sqlx query_as

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    source_type: String,
    source_location: String,
    entry_name: Option<String>,
    record_kind: String,
    filter_year: Option<i64>,
    filter_state: Option<String>,
    filter_role_code: Option<i64>,
    status: String,
    stage: Option<String>,
    schema_variant: Option<String>,
    downloaded_bytes: i64,
    download_total_bytes: Option<i64>,
    total_rows: Option<i64>,
    total_file_rows: Option<i64>,
    processed_rows: Option<i64>,
    skipped_rows: i64,
    error_count: i64,
    validation_status: Option<String>,
    validation_message: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for ImportJob {
    type Error = PipelineError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            source: ImportSource::from_parts(&row.source_type, row.source_location)?,
            entry_name: row.entry_name,
            kind: row.record_kind.parse().map_err(PipelineError::Internal)?,
            filters: ImportFilters {
                year: row.filter_year,
                state: row.filter_state,
                role_code: row.filter_role_code,
            },
            status: row.status.parse()?,
            stage: row.stage,
            schema_variant: row.schema_variant.as_deref().and_then(SchemaVariant::parse),
            downloaded_bytes: row.downloaded_bytes,
            download_total_bytes: row.download_total_bytes,
            total_rows: row.total_rows,
            total_file_rows: row.total_file_rows,
            processed_rows: row.processed_rows,
            skipped_rows: row.skipped_rows,
            error_count: row.error_count,
            validation_status: row.validation_status.map(|s| s.parse()).transpose()?,
            validation_message: row.validation_message,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BatchRow {
    id: Uuid,
    job_id: Uuid,
    batch_index: i32,
    first_line: i64,
    last_line: i64,
    total_rows: i64,
    processed_rows: i64,
    inserted_rows: i64,
    skipped_rows: i64,
    error_count: i64,
    status: String,
    error_summary: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<BatchRow> for ImportBatch {
    type Error = PipelineError;

    fn try_from(row: BatchRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            job_id: row.job_id,
            batch_index: row.batch_index,
            first_line: row.first_line,
            last_line: row.last_line,
            total_rows: row.total_rows,
            processed_rows: row.processed_rows,
            inserted_rows: row.inserted_rows,
            skipped_rows: row.skipped_rows,
            error_count: row.error_count,
            status: row.status.parse()?,
            error_summary: row.error_summary,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BatchRowRecord {
    id: Uuid,
    batch_id: Uuid,
    row_number: i64,
    status: String,
    payload: serde_json::Value,
    error_message: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BatchRowRecord> for ImportBatchRow {
    type Error = PipelineError;

    fn try_from(row: BatchRowRecord) -> Result<Self> {
        Ok(Self {
            id: row.id,
            batch_id: row.batch_id,
            row_number: row.row_number,
            status: row.status.parse()?,
            payload: row.payload,
            error_message: row.error_message,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ErrorRow {
    id: Uuid,
    job_id: Uuid,
    row_number: Option<i64>,
    error_type: String,
    message: String,
    raw_data: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ErrorRow> for ImportErrorEntry {
    fn from(row: ErrorRow) -> Self {
        Self {
            id: row.id,
            job_id: row.job_id,
            row_number: row.row_number,
            error_type: row.error_type,
            message: row.message,
            raw_data: row.raw_data,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ValidationRunRow {
    id: Uuid,
    job_id: Uuid,
    is_valid: bool,
    db_row_count: i64,
    expected_count: i64,
    message: String,
    created_at: DateTime<Utc>,
}

impl From<ValidationRunRow> for ValidationRun {
    fn from(row: ValidationRunRow) -> Self {
        Self {
            id: row.id,
            job_id: row.job_id,
            is_valid: row.is_valid,
            db_row_count: row.db_row_count,
            expected_count: row.expected_count,
            message: row.message,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ValidationIssueRow {
    id: Uuid,
    run_id: Uuid,
    job_id: Uuid,
    issue_type: String,
    severity: String,
    status: String,
    message: String,
    resolved_by: Option<String>,
    resolved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ValidationIssueRow> for ValidationIssue {
    type Error = PipelineError;

    fn try_from(row: ValidationIssueRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            run_id: row.run_id,
            job_id: row.job_id,
            issue_type: row.issue_type,
            severity: row.severity,
            status: row.status.parse()?,
            message: row.message,
            resolved_by: row.resolved_by,
            resolved_at: row.resolved_at,
            created_at: row.created_at,
        })
    }
}
