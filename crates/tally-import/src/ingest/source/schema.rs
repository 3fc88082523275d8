//! Historical column layouts of the vote-count tables
//!
//! The published tables gained columns across election cycles while keeping
//! the same logical record. Each cycle is a [`SchemaVariant`] with a fixed
//! column-index → field mapping. The variant for a file is a pure function of
//! the record kind and the column count of its first data row; counts that
//! match no variant are rejected rather than guessed.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::Path;
use thiserror::Error;

use super::decoder;
use super::records::RecordKind;

/// Schema resolution failures (always fatal for the job)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Unrecognized column count {columns} for {kind} files")]
    UnrecognizedColumnCount { kind: RecordKind, columns: usize },

    #[error("File has no data rows to infer a layout from")]
    NoDataRows,
}

/// Logical fields shared by every layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    ElectionYear,
    Round,
    ElectionCode,
    State,
    MunicipalityCode,
    MunicipalityName,
    Zone,
    RoleCode,
    RoleName,
    CandidateSeq,
    CandidateNumber,
    CandidateName,
    BallotName,
    PartyNumber,
    PartyAcronym,
    ResultStatus,
    NominalVotes,
    ValidNominalVotes,
    LegendVotes,
}

/// How a cell is normalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// Numeric code; sentinels mean "absent"
    Identifier,
    /// Vote tally; sentinels and placeholders mean zero
    Count,
}

impl Field {
    pub const fn kind(self) -> FieldKind {
        match self {
            Field::State
            | Field::MunicipalityName
            | Field::RoleName
            | Field::CandidateName
            | Field::BallotName
            | Field::PartyAcronym
            | Field::ResultStatus => FieldKind::Text,
            Field::NominalVotes | Field::ValidNominalVotes | Field::LegendVotes => {
                FieldKind::Count
            },
            Field::ElectionYear
            | Field::Round
            | Field::ElectionCode
            | Field::MunicipalityCode
            | Field::Zone
            | Field::RoleCode
            | Field::CandidateSeq
            | Field::CandidateNumber
            | Field::PartyNumber => FieldKind::Identifier,
        }
    }

    pub fn is_numeric(self) -> bool {
        self.kind() != FieldKind::Text
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Field::ElectionYear => "election_year",
            Field::Round => "round",
            Field::ElectionCode => "election_code",
            Field::State => "state",
            Field::MunicipalityCode => "municipality_code",
            Field::MunicipalityName => "municipality_name",
            Field::Zone => "zone",
            Field::RoleCode => "role_code",
            Field::RoleName => "role_name",
            Field::CandidateSeq => "candidate_seq",
            Field::CandidateNumber => "candidate_number",
            Field::CandidateName => "candidate_name",
            Field::BallotName => "ballot_name",
            Field::PartyNumber => "party_number",
            Field::PartyAcronym => "party_acronym",
            Field::ResultStatus => "result_status",
            Field::NominalVotes => "nominal_votes",
            Field::ValidNominalVotes => "valid_nominal_votes",
            Field::LegendVotes => "legend_votes",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One historical column layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaVariant {
    Candidate2014,
    Candidate2020,
    Candidate2022,
    Party2014,
    Party2022,
}

/// Static description of a variant
#[derive(Debug)]
pub struct ColumnLayout {
    pub variant: SchemaVariant,
    pub kind: RecordKind,
    /// Accepted column counts, inclusive on both ends. Wider rows only add
    /// trailing columns, so every mapped index is below the lower bound.
    pub columns: RangeInclusive<usize>,
    pub fields: &'static [(Field, usize)],
}

impl ColumnLayout {
    pub fn accepts(&self, columns: usize) -> bool {
        self.columns.contains(&columns)
    }

    pub fn numeric_fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.fields.iter().map(|(f, _)| *f).filter(|f| f.is_numeric())
    }

    pub fn index_of(&self, field: Field) -> Option<usize> {
        self.fields.iter().find(|(f, _)| *f == field).map(|(_, i)| *i)
    }

    pub fn describe_columns(&self) -> String {
        format!("{}..={}", self.columns.start(), self.columns.end())
    }
}

const CANDIDATE_2014_FIELDS: &[(Field, usize)] = &[
    (Field::ElectionYear, 2),
    (Field::Round, 5),
    (Field::ElectionCode, 6),
    (Field::State, 10),
    (Field::MunicipalityCode, 13),
    (Field::MunicipalityName, 14),
    (Field::Zone, 15),
    (Field::RoleCode, 16),
    (Field::RoleName, 17),
    (Field::CandidateSeq, 18),
    (Field::CandidateNumber, 19),
    (Field::CandidateName, 20),
    (Field::BallotName, 21),
    (Field::PartyNumber, 28),
    (Field::PartyAcronym, 29),
    (Field::ResultStatus, 33),
    (Field::NominalVotes, 35),
];

// Adds judgment/annulment columns and the valid-vote split
const CANDIDATE_2020_FIELDS: &[(Field, usize)] = &[
    (Field::ElectionYear, 2),
    (Field::Round, 5),
    (Field::ElectionCode, 6),
    (Field::State, 10),
    (Field::MunicipalityCode, 13),
    (Field::MunicipalityName, 14),
    (Field::Zone, 15),
    (Field::RoleCode, 16),
    (Field::RoleName, 17),
    (Field::CandidateSeq, 18),
    (Field::CandidateNumber, 19),
    (Field::CandidateName, 20),
    (Field::BallotName, 21),
    (Field::PartyNumber, 34),
    (Field::PartyAcronym, 35),
    (Field::NominalVotes, 38),
    (Field::ValidNominalVotes, 40),
    (Field::ResultStatus, 42),
];

// Adds the four federation columns after the party block
const CANDIDATE_2022_FIELDS: &[(Field, usize)] = &[
    (Field::ElectionYear, 2),
    (Field::Round, 5),
    (Field::ElectionCode, 6),
    (Field::State, 10),
    (Field::MunicipalityCode, 13),
    (Field::MunicipalityName, 14),
    (Field::Zone, 15),
    (Field::RoleCode, 16),
    (Field::RoleName, 17),
    (Field::CandidateSeq, 18),
    (Field::CandidateNumber, 19),
    (Field::CandidateName, 20),
    (Field::BallotName, 21),
    (Field::PartyNumber, 34),
    (Field::PartyAcronym, 35),
    (Field::NominalVotes, 42),
    (Field::ValidNominalVotes, 44),
    (Field::ResultStatus, 46),
];

const PARTY_2014_FIELDS: &[(Field, usize)] = &[
    (Field::ElectionYear, 2),
    (Field::Round, 5),
    (Field::ElectionCode, 6),
    (Field::State, 10),
    (Field::MunicipalityCode, 13),
    (Field::MunicipalityName, 14),
    (Field::Zone, 15),
    (Field::RoleCode, 16),
    (Field::RoleName, 17),
    (Field::PartyNumber, 19),
    (Field::PartyAcronym, 20),
    (Field::NominalVotes, 24),
    (Field::LegendVotes, 25),
];

const PARTY_2022_FIELDS: &[(Field, usize)] = &[
    (Field::ElectionYear, 2),
    (Field::Round, 5),
    (Field::ElectionCode, 6),
    (Field::State, 10),
    (Field::MunicipalityCode, 13),
    (Field::MunicipalityName, 14),
    (Field::Zone, 15),
    (Field::RoleCode, 16),
    (Field::RoleName, 17),
    (Field::PartyNumber, 19),
    (Field::PartyAcronym, 20),
    (Field::NominalVotes, 30),
    (Field::LegendVotes, 31),
];

static LAYOUTS: [ColumnLayout; 5] = [
    ColumnLayout {
        variant: SchemaVariant::Candidate2014,
        kind: RecordKind::CandidateVotes,
        columns: 36..=38,
        fields: CANDIDATE_2014_FIELDS,
    },
    ColumnLayout {
        variant: SchemaVariant::Candidate2020,
        kind: RecordKind::CandidateVotes,
        columns: 43..=46,
        fields: CANDIDATE_2020_FIELDS,
    },
    ColumnLayout {
        variant: SchemaVariant::Candidate2022,
        kind: RecordKind::CandidateVotes,
        columns: 47..=50,
        fields: CANDIDATE_2022_FIELDS,
    },
    ColumnLayout {
        variant: SchemaVariant::Party2014,
        kind: RecordKind::PartyVotes,
        columns: 26..=28,
        fields: PARTY_2014_FIELDS,
    },
    ColumnLayout {
        variant: SchemaVariant::Party2022,
        kind: RecordKind::PartyVotes,
        columns: 33..=36,
        fields: PARTY_2022_FIELDS,
    },
];

impl SchemaVariant {
    pub const ALL: [SchemaVariant; 5] = [
        SchemaVariant::Candidate2014,
        SchemaVariant::Candidate2020,
        SchemaVariant::Candidate2022,
        SchemaVariant::Party2014,
        SchemaVariant::Party2022,
    ];

    pub fn layout(self) -> &'static ColumnLayout {
        let index = match self {
            SchemaVariant::Candidate2014 => 0,
            SchemaVariant::Candidate2020 => 1,
            SchemaVariant::Candidate2022 => 2,
            SchemaVariant::Party2014 => 3,
            SchemaVariant::Party2022 => 4,
        };
        &LAYOUTS[index]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchemaVariant::Candidate2014 => "candidate_2014",
            SchemaVariant::Candidate2020 => "candidate_2020",
            SchemaVariant::Candidate2022 => "candidate_2022",
            SchemaVariant::Party2014 => "party_2014",
            SchemaVariant::Party2022 => "party_2022",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }
}

/// Resolve the layout for `kind` from a first-row column count
pub fn resolve(kind: RecordKind, columns: usize) -> Result<SchemaVariant, SchemaError> {
    LAYOUTS
        .iter()
        .find(|layout| layout.kind == kind && layout.accepts(columns))
        .map(|layout| layout.variant)
        .ok_or(SchemaError::UnrecognizedColumnCount { kind, columns })
}

/// Read the first data row of `path` and resolve its layout
pub fn resolve_file(kind: RecordKind, path: &Path) -> crate::error::Result<SchemaVariant> {
    let columns = decoder::first_data_row_width(path)?.ok_or(SchemaError::NoDataRows)?;
    let variant = resolve(kind, columns)?;
    tracing::info!(
        path = %path.display(),
        columns,
        variant = variant.as_str(),
        "Resolved column layout"
    );
    Ok(variant)
}
