//! Streaming row decoder for `;`-delimited Windows-1252 tables
//!
//! Decoding is synchronous and meant to run on a blocking thread. Each data
//! row becomes either a [`ParsedRow`] or a [`RowFailure`]; a bad row never
//! stops the stream. Only I/O failures of the underlying file are fatal.

use csv::{ByteRecord, ReaderBuilder};
use encoding_rs::WINDOWS_1252;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::records::{FieldValues, VoteRecord};
use super::schema::{ColumnLayout, Field, FieldKind, SchemaVariant};
use crate::error::Result;

/// Raw snippets stored with diagnostics are cut to this many characters
pub const MAX_RAW_SNIPPET_CHARS: usize = 500;

const PLACEHOLDERS: &[&str] = &["#NULO#", "#NE#"];
const SENTINELS: &[i64] = &[-1, -3];

/// Why a single row could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("Row has {found} columns, expected {expected}")]
    ColumnCount { found: usize, expected: String },

    #[error("Field {field} is not an integer: '{value}'")]
    InvalidNumber { field: Field, value: String },

    #[error("Required field {field} is missing")]
    MissingField { field: Field },

    #[error("Field {field} maps to column {index}, which the row does not have")]
    MissingColumn { field: Field, index: usize },

    #[error("Malformed row: {0}")]
    Malformed(String),
}

/// A successfully decoded row
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    /// 1-based line in the source file (the header is line 1)
    pub line: u64,
    pub record: VoteRecord,
}

/// A row that failed to decode
#[derive(Debug, Clone, PartialEq)]
pub struct RowFailure {
    pub line: u64,
    pub error: RowError,
    pub raw: String,
}

pub type DecodedRow = std::result::Result<ParsedRow, RowFailure>;

/// Decodes rows of one resolved layout
#[derive(Debug, Clone, Copy)]
pub struct RowDecoder {
    layout: &'static ColumnLayout,
}

impl RowDecoder {
    pub fn new(variant: SchemaVariant) -> Self {
        Self {
            layout: variant.layout(),
        }
    }

    /// Decode `path`, sending every row into `tx`
    ///
    /// Blocks; call from `spawn_blocking`. Stops early when the receiver is
    /// gone or `cancel` fires. Returns the number of data rows read.
    pub fn decode_file(
        &self,
        path: &Path,
        tx: mpsc::Sender<DecodedRow>,
        cancel: CancellationToken,
    ) -> Result<u64> {
        let file = File::open(path)?;
        self.decode_reader(BufReader::new(file), |row| {
            !cancel.is_cancelled() && tx.blocking_send(row).is_ok()
        })
    }

    /// Decode from any reader, handing rows to `sink` until it returns false
    pub fn decode_reader<R, F>(&self, reader: R, mut sink: F) -> Result<u64>
    where
        R: Read,
        F: FnMut(DecodedRow) -> bool,
    {
        let mut csv = table_reader(reader);
        let mut record = ByteRecord::new();
        let mut rows = 0u64;

        loop {
            // Line 1 is the header, consumed by the first read
            let line = csv.position().line().max(2);
            let decoded = match csv.read_byte_record(&mut record) {
                Ok(false) => break,
                Ok(true) => {
                    let line = record.position().map(|p| p.line()).unwrap_or(line);
                    self.decode_record(line, &record)
                },
                // Unterminated quotes and similar: the row is lost, the file is not
                Err(err) if !is_io_error(&err) => Err(RowFailure {
                    line,
                    error: RowError::Malformed(err.to_string()),
                    raw: String::new(),
                }),
                Err(err) => return Err(err.into()),
            };

            rows += 1;
            if !sink(decoded) {
                tracing::debug!(rows, "Row consumer stopped early");
                break;
            }
        }

        Ok(rows)
    }

    fn decode_record(&self, line: u64, record: &ByteRecord) -> DecodedRow {
        let cells: Vec<String> = record.iter().map(decode_cell).collect();

        let fail = |error: RowError| RowFailure {
            line,
            error,
            raw: raw_snippet(&cells),
        };

        if !self.layout.accepts(cells.len()) {
            return Err(fail(RowError::ColumnCount {
                found: cells.len(),
                expected: self.layout.describe_columns(),
            }));
        }

        let mut values = FieldValues::default();
        for (field, index) in self.layout.fields {
            let Some(raw) = cells.get(*index) else {
                return Err(fail(RowError::MissingColumn {
                    field: *field,
                    index: *index,
                }));
            };
            match field.kind() {
                FieldKind::Text => {
                    if let Some(text) = normalize_text(raw) {
                        values.set_text(*field, text);
                    }
                },
                kind => match normalize_number(raw, kind) {
                    Ok(Some(n)) => values.set_number(*field, n),
                    Ok(None) => {},
                    Err(_) => {
                        return Err(fail(RowError::InvalidNumber {
                            field: *field,
                            value: raw.clone(),
                        }))
                    },
                },
            }
        }

        VoteRecord::from_values(self.layout.kind, &values)
            .map(|record| ParsedRow { line, record })
            .map_err(fail)
    }
}

fn table_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .from_reader(reader)
}

fn is_io_error(err: &csv::Error) -> bool {
    matches!(err.kind(), csv::ErrorKind::Io(_))
}

fn decode_cell(bytes: &[u8]) -> String {
    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    text.trim().to_string()
}

/// Placeholders and empty cells become absent
pub fn normalize_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || PLACEHOLDERS.contains(&trimmed) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse a numeric cell according to its field kind
///
/// An error means the cell is present but not an integer.
pub fn normalize_number(
    raw: &str,
    kind: FieldKind,
) -> std::result::Result<Option<i64>, std::num::ParseIntError> {
    let Some(text) = normalize_text(raw) else {
        return Ok(match kind {
            FieldKind::Count => Some(0),
            _ => None,
        });
    };

    let value: i64 = text.parse()?;
    if SENTINELS.contains(&value) {
        return Ok(match kind {
            FieldKind::Count => Some(0),
            _ => None,
        });
    }

    Ok(Some(value))
}

/// Re-join decoded cells for the diagnostic log
pub fn raw_snippet(cells: &[String]) -> String {
    truncate_chars(&cells.join(";"), MAX_RAW_SNIPPET_CHARS)
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Column count of the first data row, `None` when there is none
pub fn first_data_row_width(path: &Path) -> Result<Option<usize>> {
    let mut csv = table_reader(BufReader::new(File::open(path)?));
    let mut record = ByteRecord::new();
    if csv.read_byte_record(&mut record)? {
        Ok(Some(record.len()))
    } else {
        Ok(None)
    }
}

/// Estimate data rows with a newline scan (header excluded)
pub fn count_data_rows(path: &Path) -> Result<u64> {
    count_lines(BufReader::new(File::open(path)?)).map(|lines| lines.saturating_sub(1))
}

fn count_lines<R: Read>(mut reader: R) -> Result<u64> {
    let mut buf = [0u8; 64 * 1024];
    let mut lines = 0u64;
    let mut last = None;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        lines += buf[..n].iter().filter(|b| **b == b'\n').count() as u64;
        last = Some(buf[n - 1]);
    }

    // Final line without a terminator still counts
    if matches!(last, Some(b) if b != b'\n') {
        lines += 1;
    }

    Ok(lines)
}
