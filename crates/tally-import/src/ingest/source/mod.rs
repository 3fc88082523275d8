//! Source-side stages: fetch, extract, resolve layout, decode rows

pub mod decoder;
pub mod extractor;
pub mod fetcher;
pub mod records;
pub mod schema;

pub use decoder::{DecodedRow, ParsedRow, RowDecoder, RowError, RowFailure};
pub use extractor::ExtractedEntry;
pub use fetcher::{ArchiveFetcher, DownloadProgress, FetchedArchive};
pub use records::{CandidateVote, ImportFilters, PartyVote, RecordKind, VoteRecord};
pub use schema::{Field, SchemaError, SchemaVariant};
