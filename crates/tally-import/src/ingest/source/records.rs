//! Normalized vote records and row filters

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::decoder::RowError;
use super::schema::Field;

/// Which destination table a file feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    CandidateVotes,
    PartyVotes,
}

const CANDIDATE_REQUIRED: &[Field] = &[
    Field::ElectionYear,
    Field::Round,
    Field::State,
    Field::MunicipalityCode,
    Field::Zone,
    Field::RoleCode,
    Field::CandidateNumber,
];

const PARTY_REQUIRED: &[Field] = &[
    Field::ElectionYear,
    Field::Round,
    Field::State,
    Field::MunicipalityCode,
    Field::Zone,
    Field::RoleCode,
    Field::PartyNumber,
];

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::CandidateVotes => "candidate_votes",
            RecordKind::PartyVotes => "party_votes",
        }
    }

    /// Fields a row must carry to be stored
    pub fn required_fields(self) -> &'static [Field] {
        match self {
            RecordKind::CandidateVotes => CANDIDATE_REQUIRED,
            RecordKind::PartyVotes => PARTY_REQUIRED,
        }
    }

    /// Guess the kind from a published file or archive name
    pub fn infer_from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.contains("votacao_candidato") {
            Some(RecordKind::CandidateVotes)
        } else if lower.contains("votacao_partido") {
            Some(RecordKind::PartyVotes)
        } else {
            None
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "candidate_votes" | "candidate" => Ok(RecordKind::CandidateVotes),
            "party_votes" | "party" => Ok(RecordKind::PartyVotes),
            other => Err(format!("Unknown record kind: {}", other)),
        }
    }
}

/// Normalized cells of one row, keyed by logical field
///
/// Absent values (placeholders, identifier sentinels) are simply not present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldValues {
    text: HashMap<Field, String>,
    numbers: HashMap<Field, i64>,
}

impl FieldValues {
    pub fn set_text(&mut self, field: Field, value: String) {
        self.text.insert(field, value);
    }

    pub fn set_number(&mut self, field: Field, value: i64) {
        self.numbers.insert(field, value);
    }

    pub fn text(&self, field: Field) -> Option<String> {
        self.text.get(&field).cloned()
    }

    pub fn number(&self, field: Field) -> Option<i64> {
        self.numbers.get(&field).copied()
    }

    /// Vote tallies default to zero
    pub fn count(&self, field: Field) -> i64 {
        self.number(field).unwrap_or(0)
    }

    fn require_number(&self, field: Field) -> Result<i64, RowError> {
        self.number(field).ok_or(RowError::MissingField { field })
    }

    fn require_text(&self, field: Field) -> Result<String, RowError> {
        self.text(field).ok_or(RowError::MissingField { field })
    }
}

/// One row of the candidate vote table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateVote {
    pub election_year: i64,
    pub round: i64,
    pub election_code: Option<i64>,
    pub state: String,
    pub municipality_code: i64,
    pub municipality_name: Option<String>,
    pub zone: i64,
    pub role_code: i64,
    pub role_name: Option<String>,
    pub candidate_seq: Option<i64>,
    pub candidate_number: i64,
    pub candidate_name: Option<String>,
    pub ballot_name: Option<String>,
    pub party_number: Option<i64>,
    pub party_acronym: Option<String>,
    pub result_status: Option<String>,
    pub nominal_votes: i64,
    pub valid_nominal_votes: i64,
}

/// One row of the party vote table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyVote {
    pub election_year: i64,
    pub round: i64,
    pub election_code: Option<i64>,
    pub state: String,
    pub municipality_code: i64,
    pub municipality_name: Option<String>,
    pub zone: i64,
    pub role_code: i64,
    pub role_name: Option<String>,
    pub party_number: i64,
    pub party_acronym: Option<String>,
    pub nominal_votes: i64,
    pub legend_votes: i64,
}

/// Composite identity used to drop repeated party rows within one job
pub type PartyKey = (i64, i64, i64, i64, i64, i64);

impl PartyVote {
    pub fn dedup_key(&self) -> PartyKey {
        (
            self.election_year,
            self.round,
            self.municipality_code,
            self.zone,
            self.role_code,
            self.party_number,
        )
    }
}

/// A decoded row ready for storage; also the snapshot format of failed batches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VoteRecord {
    Candidate(CandidateVote),
    Party(PartyVote),
}

impl VoteRecord {
    pub fn from_values(kind: RecordKind, values: &FieldValues) -> Result<Self, RowError> {
        match kind {
            RecordKind::CandidateVotes => Ok(VoteRecord::Candidate(CandidateVote {
                election_year: values.require_number(Field::ElectionYear)?,
                round: values.require_number(Field::Round)?,
                election_code: values.number(Field::ElectionCode),
                state: values.require_text(Field::State)?,
                municipality_code: values.require_number(Field::MunicipalityCode)?,
                municipality_name: values.text(Field::MunicipalityName),
                zone: values.require_number(Field::Zone)?,
                role_code: values.require_number(Field::RoleCode)?,
                role_name: values.text(Field::RoleName),
                candidate_seq: values.number(Field::CandidateSeq),
                candidate_number: values.require_number(Field::CandidateNumber)?,
                candidate_name: values.text(Field::CandidateName),
                ballot_name: values.text(Field::BallotName),
                party_number: values.number(Field::PartyNumber),
                party_acronym: values.text(Field::PartyAcronym),
                result_status: values.text(Field::ResultStatus),
                nominal_votes: values.count(Field::NominalVotes),
                valid_nominal_votes: values.count(Field::ValidNominalVotes),
            })),
            RecordKind::PartyVotes => Ok(VoteRecord::Party(PartyVote {
                election_year: values.require_number(Field::ElectionYear)?,
                round: values.require_number(Field::Round)?,
                election_code: values.number(Field::ElectionCode),
                state: values.require_text(Field::State)?,
                municipality_code: values.require_number(Field::MunicipalityCode)?,
                municipality_name: values.text(Field::MunicipalityName),
                zone: values.require_number(Field::Zone)?,
                role_code: values.require_number(Field::RoleCode)?,
                role_name: values.text(Field::RoleName),
                party_number: values.require_number(Field::PartyNumber)?,
                party_acronym: values.text(Field::PartyAcronym),
                nominal_votes: values.count(Field::NominalVotes),
                legend_votes: values.count(Field::LegendVotes),
            })),
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            VoteRecord::Candidate(_) => RecordKind::CandidateVotes,
            VoteRecord::Party(_) => RecordKind::PartyVotes,
        }
    }

    pub fn election_year(&self) -> i64 {
        match self {
            VoteRecord::Candidate(c) => c.election_year,
            VoteRecord::Party(p) => p.election_year,
        }
    }

    pub fn state(&self) -> &str {
        match self {
            VoteRecord::Candidate(c) => &c.state,
            VoteRecord::Party(p) => &p.state,
        }
    }

    pub fn role_code(&self) -> i64 {
        match self {
            VoteRecord::Candidate(c) => c.role_code,
            VoteRecord::Party(p) => p.role_code,
        }
    }

    pub fn party_key(&self) -> Option<PartyKey> {
        match self {
            VoteRecord::Party(p) => Some(p.dedup_key()),
            VoteRecord::Candidate(_) => None,
        }
    }
}

/// Optional row filters carried by a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImportFilters {
    pub year: Option<i64>,
    /// Two-letter state code, compared case-insensitively
    pub state: Option<String>,
    pub role_code: Option<i64>,
}

impl ImportFilters {
    pub fn is_empty(&self) -> bool {
        self.year.is_none() && self.state.is_none() && self.role_code.is_none()
    }

    pub fn matches(&self, record: &VoteRecord) -> bool {
        if let Some(year) = self.year {
            if record.election_year() != year {
                return false;
            }
        }
        if let Some(state) = &self.state {
            if !record.state().eq_ignore_ascii_case(state) {
                return false;
            }
        }
        if let Some(role) = self.role_code {
            if record.role_code() != role {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn party_values() -> FieldValues {
        let mut values = FieldValues::default();
        values.set_number(Field::ElectionYear, 2022);
        values.set_number(Field::Round, 1);
        values.set_text(Field::State, "SP".into());
        values.set_number(Field::MunicipalityCode, 71072);
        values.set_number(Field::Zone, 1);
        values.set_number(Field::RoleCode, 6);
        values.set_number(Field::PartyNumber, 13);
        values
    }

    #[test]
    fn test_infer_kind_from_published_names() {
        assert_eq!(
            RecordKind::infer_from_name("votacao_candidato_munzona_2022.zip"),
            Some(RecordKind::CandidateVotes)
        );
        assert_eq!(
            RecordKind::infer_from_name("VOTACAO_PARTIDO_MUNZONA_2018_BRASIL.csv"),
            Some(RecordKind::PartyVotes)
        );
        assert_eq!(RecordKind::infer_from_name("perfil_eleitorado_2022.zip"), None);
    }

    #[test]
    fn test_record_kind_parse() {
        assert_eq!("party".parse::<RecordKind>().unwrap(), RecordKind::PartyVotes);
        assert_eq!(
            "candidate-votes".parse::<RecordKind>().unwrap(),
            RecordKind::CandidateVotes
        );
        assert!("turnout".parse::<RecordKind>().is_err());
    }

    #[test]
    fn test_absent_counts_default_to_zero() {
        let record = VoteRecord::from_values(RecordKind::PartyVotes, &party_values()).unwrap();
        match record {
            VoteRecord::Party(p) => {
                assert_eq!(p.nominal_votes, 0);
                assert_eq!(p.legend_votes, 0);
                assert_eq!(p.party_acronym, None);
            },
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_field_is_reported() {
        let mut values = party_values();
        values.numbers.remove(&Field::Zone);
        let err = VoteRecord::from_values(RecordKind::PartyVotes, &values).unwrap_err();
        assert_eq!(err, RowError::MissingField { field: Field::Zone });
    }

    #[test]
    fn test_filters_match_case_insensitive_state() {
        let record = VoteRecord::from_values(RecordKind::PartyVotes, &party_values()).unwrap();
        let filters = ImportFilters {
            year: Some(2022),
            state: Some("sp".into()),
            role_code: Some(6),
        };
        assert!(filters.matches(&record));
        assert!(!ImportFilters {
            role_code: Some(13),
            ..filters.clone()
        }
        .matches(&record));
        assert!(ImportFilters::default().matches(&record));
    }

    #[test]
    fn test_snapshot_serialization_is_tagged() {
        let record = VoteRecord::from_values(RecordKind::PartyVotes, &party_values()).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "party");
        let back: VoteRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
