//! Tally Import Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Imports official electoral vote-count archives into PostgreSQL.
//!
//! # Overview
//!
//! A submitted archive (uploaded file or allow-listed URL) becomes a job that
//! a single in-process worker drives through:
//!
//! - **Download**: streamed with throttled byte progress and cancellation
//! - **Extract**: the data entry is chosen from the zip and written to disk
//! - **Resolve**: the column layout is picked from the first row's width
//! - **Process**: rows are decoded, filtered, de-duplicated and bulk inserted
//!   in batches; failed batches keep row snapshots for reprocessing
//! - **Validate**: stored rows are counted against the reported total
//!
//! Status changes, progress and batch outcomes are broadcast as
//! [`events::ImportEvent`]s.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tally_import::{config::Config, ImportRequest, ImportService, ImportSource, PgImportStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = sqlx::PgPool::connect(&config.database.url).await?;
//!     let store = PgImportStore::new(pool);
//!     store.migrate().await?;
//!
//!     let service = ImportService::with_default_hooks(Arc::new(store), config.import)?;
//!     service
//!         .submit(ImportRequest {
//!             source: ImportSource::Remote {
//!                 url: "https://cdn.tse.jus.br/estatistica/sead/odsele/votacao_partido_munzona/votacao_partido_munzona_2022.zip".into(),
//!             },
//!             kind: None,
//!             entry_name: None,
//!             filters: Default::default(),
//!         })
//!         .await?;
//!     service.wait_idle().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod ingest;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use error::{PipelineError, Result};
pub use events::{EventBroadcaster, ImportEvent};
pub use ingest::models::{ImportJob, ImportRequest, ImportSource, JobStatus};
pub use ingest::source::{ImportFilters, RecordKind, VoteRecord};
pub use service::{ImportService, RecoveryReport};
pub use store::{ImportStore, MemoryImportStore, PgImportStore};
