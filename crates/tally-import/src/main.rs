//! Tally Import - operator CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tally_common::logging::{init_logging, LogConfig};
use tracing::{error, info};
use uuid::Uuid;

use tally_import::{
    config::Config, ImportFilters, ImportRequest, ImportService, ImportSource, PgImportStore,
    RecordKind,
};

#[derive(Parser)]
#[command(name = "tally-import", version, about = "Import electoral vote-count archives")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit archives and process them until the queue is empty
    Run {
        /// Local .zip paths or http(s) URLs
        #[arg(required = true)]
        sources: Vec<String>,

        /// Record kind (candidate_votes or party_votes); inferred from the file name if omitted
        #[arg(long)]
        kind: Option<RecordKind>,

        /// Data entry inside the archive
        #[arg(long)]
        entry: Option<String>,

        /// Only import rows for this election year
        #[arg(long)]
        year: Option<i64>,

        /// Only import rows for this state code
        #[arg(long)]
        state: Option<String>,

        /// Only import rows for this role code
        #[arg(long)]
        role: Option<i64>,
    },

    /// Fail imports interrupted by a previous process and resume waiting ones
    Sweep,

    /// Re-run the integrity check for a job
    Validate { job_id: Uuid },

    /// Replay failed batches of a job row by row
    Reprocess {
        job_id: Uuid,

        /// Replay a single batch instead of every failed one
        #[arg(long)]
        batch: Option<Uuid>,
    },

    /// Restart a failed or cancelled remote import and process it
    Restart { job_id: Uuid },

    /// Mark a non-terminal job cancelled
    Cancel { job_id: Uuid },

    /// Show a job and its batches
    Jobs { job_id: Uuid },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .log_file_prefix("tally-import".to_string())
        .filter_directives("tally_import=info,sqlx=warn".to_string())
        .build();

    // Environment variables take precedence
    let (log_config, env_error) = log_config.merge_env_or_keep();
    if let Some(e) = env_error {
        eprintln!("Warning: ignoring LOG_* overrides: {}", e);
    }
    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        },
    };

    if let Err(e) = execute(cli.command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn execute(command: Commands) -> Result<()> {
    let config = Config::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await?;
    info!("Database connection pool established");

    let store = PgImportStore::new(pool);
    store.migrate().await?;

    let service = ImportService::with_default_hooks(Arc::new(store), config.import)?;

    match command {
        Commands::Run {
            sources,
            kind,
            entry,
            year,
            state,
            role,
        } => {
            service.recover_orphaned_jobs().await?;

            let filters = ImportFilters {
                year,
                state,
                role_code: role,
            };
            let mut submitted = Vec::with_capacity(sources.len());
            for raw in sources {
                let job_id = service
                    .submit(ImportRequest {
                        source: parse_source(&raw),
                        kind,
                        entry_name: entry.clone(),
                        filters: filters.clone(),
                    })
                    .await?;
                info!(job_id = %job_id, source = %raw, "Queued");
                submitted.push(job_id);
            }

            service.wait_idle().await;
            for job_id in submitted {
                print_json(&service.job(job_id).await?)?;
            }
        },

        Commands::Sweep => {
            let report = service.recover_orphaned_jobs().await?;
            print_json(&report)?;
            service.wait_idle().await;
        },

        Commands::Validate { job_id } => {
            print_json(&service.validate_integrity(job_id).await?)?;
        },

        Commands::Reprocess { job_id, batch } => match batch {
            Some(batch_id) => print_json(&service.reprocess_job_batch(job_id, batch_id).await?)?,
            None => print_json(&service.reprocess_all_failed(job_id).await?)?,
        },

        Commands::Restart { job_id } => {
            service.restart(job_id).await?;
            service.wait_idle().await;
            print_json(&service.job(job_id).await?)?;
        },

        Commands::Cancel { job_id } => {
            if !service.cancel(job_id).await? {
                anyhow::bail!("Job {} is already finished", job_id);
            }
            println!("Cancelled {}", job_id);
        },

        Commands::Jobs { job_id } => {
            print_json(&service.job(job_id).await?)?;
            print_json(&service.batches(job_id).await?)?;
        },
    }

    Ok(())
}

fn parse_source(raw: &str) -> ImportSource {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        ImportSource::Remote {
            url: raw.to_string(),
        }
    } else {
        ImportSource::Upload {
            path: PathBuf::from(raw),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
