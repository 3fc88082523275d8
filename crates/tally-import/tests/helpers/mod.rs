//! Test helpers for tally-import integration tests
//!
//! This module provides utilities for:
//! - Service construction over the in-memory store
//! - Archive fixtures
//! - Polling job status

#![allow(dead_code)]

pub mod fixtures;

use std::sync::Arc;
use std::time::Duration;
use tally_import::config::ImportConfig;
use tally_import::{ImportJob, ImportService, JobStatus, MemoryImportStore};
use tempfile::TempDir;
use uuid::Uuid;

pub use fixtures::*;

/// Initialize tracing for tests
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,tally_import=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Service plus the store and scratch directories behind it
pub struct TestContext {
    pub service: ImportService,
    pub store: Arc<MemoryImportStore>,
    /// Where fixture archives are written
    pub inputs: TempDir,
    pub config: ImportConfig,
    _work: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut ImportConfig)) -> Self {
        init_test_tracing();

        let work = TempDir::new().unwrap();
        let mut config = ImportConfig {
            work_dir: work.path().to_path_buf(),
            allowed_domains: vec!["127.0.0.1".to_string(), "tse.jus.br".to_string()],
            download_progress_ms: 10,
            http_timeout_secs: 30,
            ..ImportConfig::default()
        };
        adjust(&mut config);

        let store = Arc::new(MemoryImportStore::new());
        let service = ImportService::with_default_hooks(store.clone(), config.clone()).unwrap();

        Self {
            service,
            store,
            inputs: TempDir::new().unwrap(),
            config,
            _work: work,
        }
    }

    pub async fn job(&self, job_id: Uuid) -> ImportJob {
        self.service.job(job_id).await.unwrap()
    }

    /// Poll until the job reaches `status`, panicking after five seconds
    pub async fn wait_for_status(&self, job_id: Uuid, status: JobStatus) -> ImportJob {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let job = self.job(job_id).await;
            if job.status == status {
                return job;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("job {} stuck in {} waiting for {}", job_id, job.status, status);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait for the queue to drain, bounded so a hung worker fails the test
    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(20), self.service.wait_idle())
            .await
            .expect("queue did not drain");
    }
}
