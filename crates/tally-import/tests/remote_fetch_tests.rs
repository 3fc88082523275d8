//! Remote archive tests against a local HTTP fixture server

mod helpers;

use helpers::*;
use std::time::Duration;
use tally_import::ingest::source::fetcher::NoProgress;
use tally_import::ingest::source::ArchiveFetcher;
use tally_import::{
    ImportEvent, ImportFilters, ImportRequest, ImportSource, ImportStore, JobStatus, PipelineError,
    RecordKind,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ARCHIVE_PATH: &str = "/odsele/votacao_partido_munzona_2022.zip";

fn remote(server: &MockServer) -> ImportRequest {
    ImportRequest {
        source: ImportSource::Remote {
            url: format!("{}{}", server.uri(), ARCHIVE_PATH),
        },
        kind: None,
        entry_name: None,
        filters: ImportFilters::default(),
    }
}

fn party_zip(rows: usize) -> Vec<u8> {
    let rows: Vec<String> = (1..=rows as i64).map(|n| party_row(n, 10 * n)).collect();
    let data = table(PARTY_2022_COLUMNS, &rows);
    zip_bytes(&[("votacao_partido_munzona_2022_BRASIL.csv", &data)])
}

#[tokio::test]
async fn test_remote_import_reports_download_progress() {
    let server = MockServer::start().await;
    let body = party_zip(4);
    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let ctx = TestContext::new();
    let mut events = ctx.service.subscribe();
    let job_id = ctx.service.submit(remote(&server)).await.unwrap();
    ctx.settle().await;

    let job = ctx.job(job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.kind, RecordKind::PartyVotes);
    assert_eq!(job.downloaded_bytes, body.len() as i64);
    assert_eq!(job.processed_rows, Some(4));

    let mut download_reports = 0;
    let mut completed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            ImportEvent::JobProgress {
                downloaded_bytes, ..
            } if downloaded_bytes == body.len() as i64 => download_reports += 1,
            ImportEvent::JobCompleted { processed_rows, .. } => {
                assert_eq!(processed_rows, 4);
                completed = true;
            },
            _ => {},
        }
    }
    assert!(download_reports >= 1);
    assert!(completed);

    // Temporary artifacts are gone once the job is done
    assert!(!ctx.config.job_dir(job_id).exists());
}

#[tokio::test]
async fn test_disallowed_host_is_rejected_at_submission() {
    let ctx = TestContext::with_config(|c| c.allowed_domains = vec!["tse.jus.br".into()]);
    let err = ctx
        .service
        .submit(ImportRequest {
            source: ImportSource::Remote {
                url: "https://example.org/votacao_partido_munzona_2022.zip".into(),
            },
            kind: None,
            entry_name: None,
            filters: ImportFilters::default(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test]
async fn test_cancel_during_download_ends_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(party_zip(2))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let ctx = TestContext::new();
    let job_id = ctx.service.submit(remote(&server)).await.unwrap();
    ctx.wait_for_status(job_id, JobStatus::Downloading).await;

    assert!(ctx.service.cancel(job_id).await.unwrap());
    ctx.settle().await;

    let job = ctx.job(job_id).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.error_message.is_none());
    assert!(ctx.service.errors(job_id).await.unwrap().is_empty());
    assert!(!ctx.config.job_dir(job_id).exists());

    // Cancelled jobs do not block resubmission
    let resubmitted = ctx.service.submit(remote(&server)).await.unwrap();
    assert_ne!(resubmitted, job_id);
    assert!(ctx.service.cancel(resubmitted).await.unwrap());
    ctx.settle().await;
}

#[tokio::test]
async fn test_cancel_while_queued_removes_from_queue() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(party_zip(1))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let ctx = TestContext::new();
    let running = ctx.service.submit(remote(&server)).await.unwrap();
    let waiting = ctx
        .service
        .submit(ImportRequest {
            source: ImportSource::Remote {
                url: format!("{}/odsele/votacao_partido_munzona_2018.zip", server.uri()),
            },
            ..remote(&server)
        })
        .await
        .unwrap();
    ctx.wait_for_status(running, JobStatus::Downloading).await;

    let status = ctx.service.queue_status();
    assert_eq!(status.current_job_id, Some(running));
    assert_eq!(status.ordered_queue, vec![waiting]);

    assert!(ctx.service.cancel(waiting).await.unwrap());
    assert_eq!(ctx.service.queue_status().queue_length, 0);
    assert_eq!(ctx.job(waiting).await.status, JobStatus::Cancelled);

    assert!(ctx.service.cancel(running).await.unwrap());
    ctx.settle().await;
    assert_eq!(ctx.job(running).await.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_failed_download_then_restart_reuses_job() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(party_zip(3)))
        .mount(&server)
        .await;

    let ctx = TestContext::new();
    let job_id = ctx.service.submit(remote(&server)).await.unwrap();
    ctx.settle().await;

    let failed = ctx.job(job_id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error_message.unwrap().contains("503"));
    let errors = ctx.service.errors(job_id).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_type, "transport");

    let restarted = ctx.service.restart(job_id).await.unwrap();
    assert_eq!(restarted, job_id);
    ctx.settle().await;

    let job = ctx.job(job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.error_message.is_none());
    assert_eq!(job.processed_rows, Some(3));
    // Diagnostics from the failed attempt were cleared
    assert!(ctx.service.errors(job_id).await.unwrap().is_empty());
    assert_eq!(ctx.store.count_records(job_id, RecordKind::PartyVotes).await.unwrap(), 3);
}

#[tokio::test]
async fn test_fetcher_honors_cancel_mid_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(party_zip(1))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let fetcher = ArchiveFetcher::new(
        vec!["127.0.0.1".into()],
        Duration::from_millis(10),
        Duration::from_secs(60),
    )
    .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = fetcher
        .fetch(
            &format!("{}{}", server.uri(), ARCHIVE_PATH),
            dir.path(),
            &cancel,
            &NoProgress,
        )
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}
