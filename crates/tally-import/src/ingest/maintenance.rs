//! Post-import maintenance
//!
//! After a job completes, planner statistics for the destination table are
//! refreshed and every registered [`PostImportHook`] runs. This happens on a
//! detached task: failures are logged and never touch the job.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::models::ImportJob;
use crate::error::Result;
use crate::store::ImportStore;

/// Work triggered by a completed import (summary recomputation and similar)
#[async_trait]
pub trait PostImportHook: Send + Sync {
    fn name(&self) -> &str;

    async fn after_import(&self, job: &ImportJob) -> Result<()>;
}

/// Default hook: records that downstream summaries are stale
pub struct LoggingHook;

#[async_trait]
impl PostImportHook for LoggingHook {
    fn name(&self) -> &str {
        "log"
    }

    async fn after_import(&self, job: &ImportJob) -> Result<()> {
        info!(
            job_id = %job.id,
            kind = %job.kind,
            rows = job.processed_rows.unwrap_or(0),
            "Import completed; downstream summaries need recomputing"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct Maintenance {
    store: Arc<dyn ImportStore>,
    hooks: Vec<Arc<dyn PostImportHook>>,
}

impl Maintenance {
    pub fn new(store: Arc<dyn ImportStore>, hooks: Vec<Arc<dyn PostImportHook>>) -> Self {
        Self { store, hooks }
    }

    /// Run maintenance for `job` without waiting for it
    pub fn spawn(&self, job: ImportJob) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run(&job).await })
    }

    pub async fn run(&self, job: &ImportJob) {
        if let Err(e) = self.store.refresh_statistics(job.kind).await {
            warn!(job_id = %job.id, error = %e, "Statistics refresh failed");
        }

        for hook in &self.hooks {
            if let Err(e) = hook.after_import(job).await {
                warn!(job_id = %job.id, hook = hook.name(), error = %e, "Post-import hook failed");
            }
        }
    }
}
