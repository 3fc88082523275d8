//! Data-entry selection and extraction from zip archives
//!
//! Only the central directory is read to pick an entry; the chosen entry is
//! then streamed to disk so multi-gigabyte tables never sit in memory.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

use crate::error::{PipelineError, Result};

const DATA_EXTENSIONS: &[&str] = &[".csv", ".txt"];

/// The extracted data table
#[derive(Debug, Clone)]
pub struct ExtractedEntry {
    /// Full entry name inside the archive
    pub entry_name: String,
    pub path: PathBuf,
    pub bytes: u64,
}

fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

fn is_platform_metadata(name: &str) -> bool {
    let base = basename(name);
    name.starts_with("__MACOSX/")
        || name.contains("/__MACOSX/")
        || base.starts_with("._")
        || base == ".DS_Store"
}

/// Entries that look like data tables, sorted by name
pub fn data_entries<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut entries: Vec<String> = names
        .into_iter()
        .filter(|name| !name.ends_with('/'))
        .filter(|name| !is_platform_metadata(name))
        .filter(|name| {
            let lower = name.to_lowercase();
            DATA_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
        })
        .map(str::to_string)
        .collect();
    entries.sort();
    entries
}

/// Pick the entry to import
///
/// An explicit request must match (full name or basename). Otherwise the
/// nationwide `BRASIL` extract is preferred, then the first entry by name.
pub fn select_entry(entries: &[String], requested: Option<&str>) -> Result<String> {
    if let Some(requested) = requested {
        return entries
            .iter()
            .find(|name| name.as_str() == requested || basename(name) == requested)
            .cloned()
            .ok_or_else(|| {
                PipelineError::Format(format!(
                    "Entry '{}' not found in archive (available: {})",
                    requested,
                    entries.join(", ")
                ))
            });
    }

    entries
        .iter()
        .find(|name| name.to_uppercase().contains("BRASIL"))
        .or_else(|| entries.first())
        .cloned()
        .ok_or_else(|| PipelineError::Format("Archive contains no .csv or .txt data entry".into()))
}

/// Extract the selected entry of `archive` into `dest_dir`
pub async fn extract(
    archive: &Path,
    dest_dir: &Path,
    requested: Option<String>,
) -> Result<ExtractedEntry> {
    let archive = archive.to_path_buf();
    let dest_dir = dest_dir.to_path_buf();
    tokio::task::spawn_blocking(move || extract_blocking(&archive, &dest_dir, requested.as_deref()))
        .await?
}

fn extract_blocking(
    archive_path: &Path,
    dest_dir: &Path,
    requested: Option<&str>,
) -> Result<ExtractedEntry> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| {
        PipelineError::Format(format!(
            "Cannot open archive {}: {}",
            archive_path.display(),
            e
        ))
    })?;

    let entries = data_entries(archive.file_names());
    debug!(archive = %archive_path.display(), candidates = entries.len(), "Scanned archive directory");
    let entry_name = select_entry(&entries, requested)?;

    std::fs::create_dir_all(dest_dir)?;
    let path = dest_dir.join(basename(&entry_name));

    let mut entry = archive.by_name(&entry_name)?;
    let mut out = BufWriter::new(File::create(&path)?);
    let bytes = std::io::copy(&mut entry, &mut out)?;
    out.flush()?;

    info!(entry = %entry_name, path = %path.display(), bytes, "Extracted data entry");

    Ok(ExtractedEntry {
        entry_name,
        path,
        bytes,
    })
}
