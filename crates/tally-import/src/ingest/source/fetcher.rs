//! Remote archive fetcher
//!
//! Streams an allow-listed `.zip` URL to the job's temp directory, reporting
//! byte progress at a bounded rate and honoring cancellation between reads.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::error::{PipelineError, Result};

/// Receives throttled download progress
#[async_trait]
pub trait DownloadProgress: Send + Sync {
    async fn report(&self, downloaded_bytes: u64, total_bytes: Option<u64>);
}

/// Progress sink that discards reports
pub struct NoProgress;

#[async_trait]
impl DownloadProgress for NoProgress {
    async fn report(&self, _downloaded_bytes: u64, _total_bytes: Option<u64>) {}
}

/// A fully downloaded archive
#[derive(Debug, Clone)]
pub struct FetchedArchive {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Check scheme, host allow-list and archive extension
pub fn validate_remote_url(raw: &str, allowed_domains: &[String]) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| PipelineError::Validation(format!("Invalid URL '{}': {}", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(PipelineError::Validation(format!(
            "Unsupported URL scheme '{}'; use http or https",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| PipelineError::Validation(format!("URL '{}' has no host", raw)))?
        .to_lowercase();

    let allowed = allowed_domains
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)));
    if !allowed {
        return Err(PipelineError::Validation(format!(
            "Host '{}' is not an allowed download domain",
            host
        )));
    }

    if !url.path().to_lowercase().ends_with(".zip") {
        return Err(PipelineError::Validation(format!(
            "URL '{}' does not point to a .zip archive",
            raw
        )));
    }

    Ok(url)
}

/// Local file name for a downloaded URL
pub fn archive_file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty() && !name.contains(".."))
        .unwrap_or("archive.zip")
        .to_string()
}

/// Streaming HTTP downloader
pub struct ArchiveFetcher {
    client: Client,
    allowed_domains: Vec<String>,
    progress_interval: Duration,
}

impl ArchiveFetcher {
    pub fn new(
        allowed_domains: Vec<String>,
        progress_interval: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tally-import/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            allowed_domains,
            progress_interval,
        })
    }

    /// Download `raw_url` into `dest_dir`
    ///
    /// Every chunk read races `cancel`; a fired token yields
    /// [`PipelineError::Cancelled`] and leaves the partial file for the caller
    /// to clean up with the job directory.
    pub async fn fetch(
        &self,
        raw_url: &str,
        dest_dir: &Path,
        cancel: &CancellationToken,
        progress: &dyn DownloadProgress,
    ) -> Result<FetchedArchive> {
        let url = validate_remote_url(raw_url, &self.allowed_domains)?;
        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(archive_file_name(&url));

        info!(url = %url, path = %path.display(), "Downloading archive");

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            response = self.client.get(url.clone()).send() => response
                .map_err(|e| PipelineError::Transport(format!("Request to {} failed: {}", url, e)))?,
        };

        if !response.status().is_success() {
            return Err(PipelineError::Transport(format!(
                "Download of {} failed with HTTP {}",
                url,
                response.status()
            )));
        }

        let total = response.content_length();
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(&path).await?;
        let mut downloaded = 0u64;
        let mut last_report = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                chunk = stream.next() => chunk,
            };

            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk.map_err(|e| {
                PipelineError::Transport(format!("Reading body of {} failed: {}", url, e))
            })?;

            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if last_report.elapsed() >= self.progress_interval {
                debug!(downloaded, total, "Download progress");
                progress.report(downloaded, total).await;
                last_report = Instant::now();
            }
        }

        file.flush().await?;
        progress.report(downloaded, total.or(Some(downloaded))).await;

        info!(path = %path.display(), bytes = downloaded, "Archive downloaded");

        Ok(FetchedArchive {
            path,
            bytes: downloaded,
        })
    }
}
