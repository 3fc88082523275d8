//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/tally";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Import Configuration Constants
// ============================================================================

/// Rows accumulated before one bulk insert.
pub const DEFAULT_BATCH_SIZE: usize = 2000;

/// Job counters are persisted after this many batches.
pub const DEFAULT_PROGRESS_EVERY_BATCHES: usize = 5;

/// Minimum interval between persisted download progress updates.
pub const DEFAULT_DOWNLOAD_PROGRESS_MS: u64 = 1000;

/// Domains remote archives may be fetched from (subdomains included).
pub const DEFAULT_ALLOWED_DOMAINS: &str = "tse.jus.br";

/// Whole-request timeout for archive downloads (2 hours).
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 7200;

/// Buffered events per subscriber before the oldest are dropped.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub import: ImportConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Import pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Root for per-job temporary directories
    pub work_dir: PathBuf,
    pub batch_size: usize,
    pub progress_every_batches: usize,
    pub download_progress_ms: u64,
    pub allowed_domains: Vec<String>,
    pub http_timeout_secs: u64,
    pub event_capacity: usize,
}

impl ImportConfig {
    pub fn download_progress_interval(&self) -> Duration {
        Duration::from_millis(self.download_progress_ms)
    }

    /// Temporary directory owned by one job
    pub fn job_dir(&self, job_id: uuid::Uuid) -> PathBuf {
        self.work_dir.join(job_id.to_string())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("Import batch size must be greater than 0");
        }

        if self.progress_every_batches == 0 {
            anyhow::bail!("Progress persistence interval must be at least one batch");
        }

        if self.allowed_domains.is_empty() {
            anyhow::bail!("At least one allowed download domain is required");
        }

        if self.event_capacity == 0 {
            anyhow::bail!("Event channel capacity must be greater than 0");
        }

        Ok(())
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("tally-import"),
            batch_size: DEFAULT_BATCH_SIZE,
            progress_every_batches: DEFAULT_PROGRESS_EVERY_BATCHES,
            download_progress_ms: DEFAULT_DOWNLOAD_PROGRESS_MS,
            allowed_domains: split_list(DEFAULT_ALLOWED_DOMAINS),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = ImportConfig::default();

        let config = Config {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_or("DATABASE_IDLE_TIMEOUT", DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
            },
            import: ImportConfig {
                work_dir: std::env::var("IMPORT_WORK_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.work_dir),
                batch_size: env_or("IMPORT_BATCH_SIZE", DEFAULT_BATCH_SIZE),
                progress_every_batches: env_or(
                    "IMPORT_PROGRESS_EVERY_BATCHES",
                    DEFAULT_PROGRESS_EVERY_BATCHES,
                ),
                download_progress_ms: env_or("IMPORT_DOWNLOAD_PROGRESS_MS", DEFAULT_DOWNLOAD_PROGRESS_MS),
                allowed_domains: std::env::var("IMPORT_ALLOWED_DOMAINS")
                    .map(|s| split_list(&s))
                    .unwrap_or(defaults.allowed_domains),
                http_timeout_secs: env_or("IMPORT_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
                event_capacity: env_or("IMPORT_EVENT_CAPACITY", DEFAULT_EVENT_CAPACITY),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        self.import.validate()
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
