//! End-to-end pipeline tests over the in-memory store
//!
//! Each test writes fixture archives to a scratch directory, submits them
//! through [`ImportService`] and waits for the single worker to drain.

mod helpers;

use helpers::*;
use std::collections::HashSet;
use tally_import::ingest::models::{BatchStatus, IssueStatus, ValidationStatus};
use tally_import::service::INTERRUPTED_MESSAGE;
use tally_import::{
    ImportEvent, ImportFilters, ImportJob, ImportRequest, ImportSource, ImportStore, JobStatus,
    PipelineError, RecordKind, VoteRecord,
};

fn upload(path: std::path::PathBuf) -> ImportRequest {
    ImportRequest {
        source: ImportSource::Upload { path },
        kind: None,
        entry_name: None,
        filters: ImportFilters::default(),
    }
}

#[tokio::test]
async fn test_ten_rows_with_two_malformed() {
    let ctx = TestContext::new();
    let mut rows: Vec<String> = (1..=10).map(|n| party_row(n, 100 + n)).collect();
    // Data starts on line 2, so rows[2] is line 4 and rows[7] is line 9
    rows[2] = short_row();
    rows[7] = party_row_with_bad_votes(8);
    let archive = party_archive(ctx.inputs.path(), "votacao_partido_munzona_2022.zip", &rows);

    let job_id = ctx.service.submit(upload(archive)).await.unwrap();
    ctx.settle().await;

    let job = ctx.job(job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.kind, RecordKind::PartyVotes);
    assert_eq!(job.total_rows, Some(10));
    assert_eq!(job.total_file_rows, Some(10));
    assert_eq!(job.processed_rows, Some(8));
    assert_eq!(job.error_count, 2);
    assert_eq!(job.skipped_rows, 0);
    assert!(job.processed_rows.unwrap() <= job.total_file_rows.unwrap());
    assert!(job.started_at.is_some() && job.completed_at.is_some());
    assert_eq!(job.validation_status, Some(ValidationStatus::Passed));

    let errors = ctx.service.errors(job_id).await.unwrap();
    let mut lines: Vec<i64> = errors.iter().filter_map(|e| e.row_number).collect();
    lines.sort();
    assert_eq!(lines, vec![4, 9]);
    assert!(errors.iter().all(|e| e.error_type == "parse"));
    assert!(errors.iter().all(|e| e.raw_data.as_deref().is_some_and(|r| r.len() <= 500)));

    assert_eq!(ctx.store.count_records(job_id, RecordKind::PartyVotes).await.unwrap(), 8);

    let batches = ctx.service.batches(job_id).await.unwrap();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.first_line, 2);
    assert_eq!(batch.last_line, 11);
    assert_eq!(
        batch.processed_rows,
        batch.inserted_rows + batch.skipped_rows + batch.error_count
    );

    // Statistics refresh runs detached after completion
    let refreshed = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while ctx.store.statistics_refreshes().await.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(refreshed.is_ok());
    assert_eq!(ctx.store.statistics_refreshes().await, vec![RecordKind::PartyVotes]);
}

#[tokio::test]
async fn test_batches_split_and_filters_count_as_skipped() {
    let ctx = TestContext::with_config(|c| c.batch_size = 4);
    let mut rows: Vec<String> = (1..=9).map(|n| party_row(n, 10)).collect();
    rows.push(party_row_for(2022, "RJ", 60011, 50, 10));
    rows.push(party_row(3, 10));
    let archive = party_archive(ctx.inputs.path(), "votacao_partido_munzona_2022.zip", &rows);

    let job_id = ctx
        .service
        .submit(ImportRequest {
            filters: ImportFilters {
                state: Some("sp".into()),
                ..ImportFilters::default()
            },
            ..upload(archive)
        })
        .await
        .unwrap();
    ctx.settle().await;

    let job = ctx.job(job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_file_rows, Some(11));
    // One other-state row filtered, one repeated party key dropped
    assert_eq!(job.skipped_rows, 2);
    assert_eq!(job.processed_rows, Some(9));

    let batches = ctx.service.batches(job_id).await.unwrap();
    let indexes: Vec<i32> = batches.iter().map(|b| b.batch_index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);
    assert_eq!(batches[2].total_rows, 1);
}

#[tokio::test]
async fn test_duplicate_submission_is_rejected() {
    let ctx = TestContext::new();
    let archive = party_archive(
        ctx.inputs.path(),
        "votacao_partido_munzona_2022.zip",
        &[party_row(13, 5)],
    );

    let first = ctx.service.submit(upload(archive.clone())).await.unwrap();
    ctx.settle().await;

    match ctx.service.submit(upload(archive.clone())).await {
        Err(PipelineError::DuplicateJob { existing_job_id }) => assert_eq!(existing_job_id, first),
        other => panic!("expected duplicate rejection, got {:?}", other),
    }

    // Different filters are a different submission
    let filtered = ctx
        .service
        .submit(ImportRequest {
            filters: ImportFilters {
                year: Some(2022),
                ..ImportFilters::default()
            },
            ..upload(archive)
        })
        .await
        .unwrap();
    assert_ne!(filtered, first);
    ctx.settle().await;
}

#[tokio::test]
async fn test_unrecognized_layout_fails_job() {
    let ctx = TestContext::new();
    let data = table(20, &[vec!["\"1\""; 20].join(";")]);
    let archive = write_zip(
        ctx.inputs.path(),
        "votacao_partido_munzona_1998.zip",
        &[("votacao_partido_munzona_1998_BRASIL.txt", &data)],
    );

    let mut events = ctx.service.subscribe();
    let job_id = ctx.service.submit(upload(archive)).await.unwrap();
    ctx.settle().await;

    let job = ctx.job(job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("20"));

    let mut saw_failed = false;
    while let Ok(event) = events.try_recv() {
        if let ImportEvent::JobFailed { job_id: id, .. } = event {
            assert_eq!(id, job_id);
            saw_failed = true;
        }
    }
    assert!(saw_failed);
}

#[tokio::test]
async fn test_archive_without_data_entry_fails_job() {
    let ctx = TestContext::new();
    let archive = write_zip(
        ctx.inputs.path(),
        "votacao_partido_munzona_2022.zip",
        &[("leiame.pdf", b"%PDF"), ("__MACOSX/._dados.csv", b"x")],
    );

    let job_id = ctx.service.submit(upload(archive)).await.unwrap();
    ctx.settle().await;

    let job = ctx.job(job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    let errors = ctx.service.errors(job_id).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_type, "format");
}

#[tokio::test]
async fn test_kind_must_be_inferable_or_given() {
    let ctx = TestContext::new();
    let archive = party_archive(ctx.inputs.path(), "dados.zip", &[party_row(13, 5)]);

    let err = ctx.service.submit(upload(archive.clone())).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));

    let job_id = ctx
        .service
        .submit(ImportRequest {
            kind: Some(RecordKind::PartyVotes),
            ..upload(archive)
        })
        .await
        .unwrap();
    ctx.settle().await;
    assert_eq!(ctx.job(job_id).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_validation_discrepancy_is_flagged_not_fatal() {
    let ctx = TestContext::new();
    let rows: Vec<String> = (1..=5).map(|n| candidate_row(1300 + n, 50)).collect();
    let archive = candidate_archive(ctx.inputs.path(), "votacao_candidato_munzona_2022.zip", &rows);

    let job_id = ctx.service.submit(upload(archive)).await.unwrap();
    ctx.settle().await;
    assert_eq!(ctx.job(job_id).await.validation_status, Some(ValidationStatus::Passed));

    assert_eq!(ctx.store.delete_records(job_id, 2).await, 2);
    let report = ctx.service.validate_integrity(job_id).await.unwrap();
    assert!(!report.is_valid);
    assert_eq!(report.db_row_count, 3);
    assert_eq!(report.expected_count, 5);

    let job = ctx.job(job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.validation_status, Some(ValidationStatus::Failed));

    let issues = ctx.service.validation_issues(job_id).await.unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].issue_type, "row_count_mismatch");
    assert_eq!(issues[0].severity, "error");
    assert_eq!(issues[0].status, IssueStatus::Open);

    assert!(ctx
        .service
        .resolve_issue(issues[0].id, IssueStatus::Open, "auditor")
        .await
        .is_err());
    ctx.service
        .resolve_issue(issues[0].id, IssueStatus::Resolved, "auditor")
        .await
        .unwrap();
    let issues = ctx.service.validation_issues(job_id).await.unwrap();
    assert_eq!(issues[0].status, IssueStatus::Resolved);
    assert_eq!(issues[0].resolved_by.as_deref(), Some("auditor"));
}

#[tokio::test]
async fn test_reprocess_three_of_fifty_failing_rows() {
    let ctx = TestContext::with_config(|c| c.batch_size = 50);
    let poisoned: HashSet<i64> = [7, 21, 33].into_iter().collect();
    let rows: Vec<String> = (1..=50).map(|n| party_row(n, 10)).collect();
    let archive = party_archive(ctx.inputs.path(), "votacao_partido_munzona_2022.zip", &rows);

    let fault = poisoned.clone();
    ctx.store
        .fail_inserts_when(move |r| matches!(r, VoteRecord::Party(p) if fault.contains(&p.party_number)))
        .await;

    let job_id = ctx.service.submit(upload(archive)).await.unwrap();
    ctx.settle().await;

    let job = ctx.job(job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_rows, Some(0));
    assert_eq!(job.error_count, 50);

    let batches = ctx.service.batches(job_id).await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].status, BatchStatus::Failed);
    let batch_id = batches[0].id;

    // A batch is only replayed under the job that owns it
    let other_job = uuid::Uuid::new_v4();
    assert!(matches!(
        ctx.service.reprocess_job_batch(other_job, batch_id).await,
        Err(PipelineError::Validation(_))
    ));
    assert_eq!(ctx.service.batches(job_id).await.unwrap()[0].status, BatchStatus::Failed);
    assert_eq!(ctx.job(job_id).await.error_count, 50);

    // Still failing for the poisoned rows: only they stay in error
    let summary = ctx.service.reprocess_job_batch(job_id, batch_id).await.unwrap();
    assert_eq!(summary.replayed, 50);
    assert_eq!(summary.inserted, 47);
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.status, BatchStatus::Failed);

    let job = ctx.job(job_id).await;
    assert_eq!(job.error_count, 3);
    assert_eq!(job.processed_rows, Some(47));

    let batch = &ctx.service.batches(job_id).await.unwrap()[0];
    assert_eq!(batch.error_count, 3);
    assert_eq!(batch.inserted_rows, 47);
    let summary_text = batch.error_summary.clone().unwrap();
    assert_eq!(summary_text.matches("line ").count(), 3);

    // Fixed upstream: only the three failures are replayed
    ctx.store.clear_insert_fault().await;
    let results = ctx.service.reprocess_all_failed(job_id).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].replayed, 3);
    assert_eq!(results[0].inserted, 3);
    assert_eq!(results[0].status, BatchStatus::Completed);

    let job = ctx.job(job_id).await;
    assert_eq!(job.error_count, 0);
    assert_eq!(job.processed_rows, Some(50));
    assert_eq!(ctx.store.count_records(job_id, RecordKind::PartyVotes).await.unwrap(), 50);

    let batch = &ctx.service.batches(job_id).await.unwrap()[0];
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(
        batch.processed_rows,
        batch.inserted_rows + batch.skipped_rows + batch.error_count
    );
    assert!(ctx.service.validate_integrity(job_id).await.unwrap().is_valid);

    // Completed batches are not eligible
    assert!(matches!(
        ctx.service.reprocess_batch(batch_id).await,
        Err(PipelineError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_queue_runs_jobs_one_at_a_time_in_order() {
    let ctx = TestContext::with_config(|c| c.batch_size = 2);
    let mut events = ctx.service.subscribe();

    let mut submitted = Vec::new();
    for year in [2014, 2018, 2022] {
        let rows: Vec<String> = (1..=6).map(|n| party_row_for(year, "SP", 71072, n, 1)).collect();
        let archive = party_archive(
            ctx.inputs.path(),
            &format!("votacao_partido_munzona_{}.zip", year),
            &rows,
        );
        submitted.push(ctx.service.submit(upload(archive)).await.unwrap());
    }
    ctx.settle().await;

    let mut started = Vec::new();
    let mut running: Option<uuid::Uuid> = None;
    while let Ok(event) = events.try_recv() {
        if let ImportEvent::JobStatus { job_id, status, .. } = event {
            match status {
                JobStatus::Downloading => {
                    assert!(running.is_none(), "{} started while {:?} ran", job_id, running);
                    running = Some(job_id);
                    started.push(job_id);
                },
                s if s.is_terminal() => {
                    assert_eq!(running, Some(job_id));
                    running = None;
                },
                _ => {},
            }
        }
    }
    assert_eq!(started, submitted);

    let status = ctx.service.queue_status();
    assert!(!status.is_processing);
    assert_eq!(status.queue_length, 0);
    for job_id in submitted {
        assert_eq!(ctx.job(job_id).await.status, JobStatus::Completed);
    }
}

#[tokio::test]
async fn test_startup_sweep_fails_orphans_and_requeues_waiting() {
    let ctx = TestContext::new();
    let archive = party_archive(
        ctx.inputs.path(),
        "votacao_partido_munzona_2022.zip",
        &[party_row(13, 5), party_row(45, 7)],
    );

    let mut orphan = ImportJob::new(
        ImportSource::Remote {
            url: "https://cdn.tse.jus.br/votacao_partido_munzona_2018.zip".into(),
        },
        RecordKind::PartyVotes,
        None,
        ImportFilters::default(),
    );
    orphan.status = JobStatus::Processing;
    ctx.store.insert_job(&orphan).await.unwrap();

    let waiting = ImportJob::new(
        ImportSource::Upload { path: archive },
        RecordKind::PartyVotes,
        None,
        ImportFilters::default(),
    );
    ctx.store.insert_job(&waiting).await.unwrap();

    let report = ctx.service.recover_orphaned_jobs().await.unwrap();
    assert_eq!(report.failed, vec![orphan.id]);
    assert_eq!(report.requeued, vec![waiting.id]);
    ctx.settle().await;

    let orphan = ctx.job(orphan.id).await;
    assert_eq!(orphan.status, JobStatus::Failed);
    assert_eq!(orphan.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));

    let waiting = ctx.job(waiting.id).await;
    assert_eq!(waiting.status, JobStatus::Completed);
    assert_eq!(waiting.processed_rows, Some(2));
}

#[tokio::test]
async fn test_delete_and_restart_rules() {
    let ctx = TestContext::new();
    let archive = party_archive(
        ctx.inputs.path(),
        "votacao_partido_munzona_2022.zip",
        &[party_row(13, 5)],
    );

    let job_id = ctx.service.submit(upload(archive)).await.unwrap();
    ctx.settle().await;

    // Completed jobs cannot be cancelled or restarted
    assert!(!ctx.service.cancel(job_id).await.unwrap());
    assert!(ctx.service.restart(job_id).await.is_err());

    ctx.service.delete_job(job_id).await.unwrap();
    assert!(matches!(
        ctx.service.job(job_id).await,
        Err(PipelineError::NotFound(_))
    ));
    assert!(ctx.service.batches(job_id).await.unwrap().is_empty());
    assert_eq!(ctx.store.count_records(job_id, RecordKind::PartyVotes).await.unwrap(), 0);
}
