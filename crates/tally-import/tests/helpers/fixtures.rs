//! Archive and row fixtures
//!
//! Rows are written in the published layout: `;`-delimited, every cell
//! quoted, Windows-1252 encoded, one header line.

use encoding_rs::WINDOWS_1252;
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Width of the 2022 party layout
pub const PARTY_2022_COLUMNS: usize = 36;
/// Width of the 2022 candidate layout
pub const CANDIDATE_2022_COLUMNS: usize = 50;

fn quoted_row(width: usize, cells: &[(usize, String)]) -> String {
    let mut row = vec!["\"#NULO#\"".to_string(); width];
    for (index, value) in cells {
        row[*index] = format!("\"{}\"", value);
    }
    row.join(";")
}

/// A valid 2022 party row for São Paulo, deputy role
pub fn party_row(party_number: i64, nominal_votes: i64) -> String {
    party_row_for(2022, "SP", 71072, party_number, nominal_votes)
}

pub fn party_row_for(
    year: i64,
    state: &str,
    municipality: i64,
    party_number: i64,
    nominal_votes: i64,
) -> String {
    quoted_row(
        PARTY_2022_COLUMNS,
        &[
            (2, year.to_string()),
            (5, "1".into()),
            (6, "546".into()),
            (10, state.into()),
            (13, municipality.to_string()),
            (14, "SÃO PAULO".into()),
            (15, "1".into()),
            (16, "6".into()),
            (17, "DEPUTADO FEDERAL".into()),
            (19, party_number.to_string()),
            (20, format!("P{}", party_number)),
            (30, nominal_votes.to_string()),
            (31, "3".into()),
        ],
    )
}

/// A valid 2022 candidate row
pub fn candidate_row(candidate_number: i64, nominal_votes: i64) -> String {
    quoted_row(
        CANDIDATE_2022_COLUMNS,
        &[
            (2, "2022".into()),
            (5, "1".into()),
            (6, "546".into()),
            (10, "RJ".into()),
            (13, "60011".into()),
            (14, "NITERÓI".into()),
            (15, "4".into()),
            (16, "6".into()),
            (17, "DEPUTADO FEDERAL".into()),
            (18, format!("19000{}", candidate_number)),
            (19, candidate_number.to_string()),
            (20, format!("CANDIDATO {}", candidate_number)),
            (21, format!("URNA {}", candidate_number)),
            (34, "13".into()),
            (35, "PT".into()),
            (42, nominal_votes.to_string()),
            (44, nominal_votes.to_string()),
            (46, "ELEITO".into()),
        ],
    )
}

/// Row with too few columns
pub fn short_row() -> String {
    "\"2022\";\"1\";\"SP\"".to_string()
}

/// Party row whose vote count is not a number
pub fn party_row_with_bad_votes(party_number: i64) -> String {
    party_row(party_number, 1).replace("\"1\";\"3\"", "\"mil\";\"3\"")
}

/// Header plus `rows`, Windows-1252 encoded
pub fn table(width: usize, rows: &[String]) -> Vec<u8> {
    let header = (0..width)
        .map(|i| format!("\"COL_{}\"", i))
        .collect::<Vec<_>>()
        .join(";");
    let mut text = header;
    for row in rows {
        text.push('\n');
        text.push_str(row);
    }
    text.push('\n');

    let (encoded, _, _) = WINDOWS_1252.encode(&text);
    encoded.into_owned()
}

/// Zip archive bytes holding `entries`
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Write a zip archive named `file_name` under `dir`
pub fn write_zip(dir: &Path, file_name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, zip_bytes(entries)).unwrap();
    path
}

/// Party archive with one data entry plus platform metadata to ignore
pub fn party_archive(dir: &Path, file_name: &str, rows: &[String]) -> PathBuf {
    let data = table(PARTY_2022_COLUMNS, rows);
    write_zip(
        dir,
        file_name,
        &[
            ("__MACOSX/._votacao_partido_munzona_2022_BRASIL.csv", b"junk"),
            ("leiame.pdf", b"%PDF"),
            ("votacao_partido_munzona_2022_BRASIL.csv", &data),
        ],
    )
}

pub fn candidate_archive(dir: &Path, file_name: &str, rows: &[String]) -> PathBuf {
    let data = table(CANDIDATE_2022_COLUMNS, rows);
    write_zip(dir, file_name, &[("votacao_candidato_munzona_2022_RJ.csv", &data)])
}
