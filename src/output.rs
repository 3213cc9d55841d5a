//! Result types returned by the generation entry points.

use crate::candidate::CandidateRecord;
use crate::error::CandidateError;
use serde::{Deserialize, Serialize};

/// Everything a batch produced.
///
/// Returned even when some candidates failed; check
/// [`GenerationOutput::failures`] or `stats.failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOutput {
    /// The zip archive holding one document per successful candidate.
    #[serde(skip)]
    pub archive: Vec<u8>,
    /// Archive entries in candidate order.
    pub entries: Vec<ArchiveEntry>,
    /// Unique candidates, in first-seen order with last-seen values.
    pub candidates: Vec<CandidateRecord>,
    /// Per-candidate errors that did not abort the batch.
    pub failures: Vec<CandidateError>,
    pub stats: GenerationStats,
}

/// One document inside the output archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub name: String,
    pub identifier: String,
    pub candidate_name: String,
    pub size_bytes: u64,
}

/// Counters and timings for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationStats {
    /// Valid rows read from the spreadsheet (duplicates included).
    pub rows: usize,
    /// Rows whose identifier repeated an earlier one.
    pub duplicates: usize,
    /// Unique candidates attempted.
    pub unique_candidates: usize,
    /// Documents written into the archive.
    pub packaged: usize,
    /// Unique candidates with no document in the archive.
    pub failed: usize,
    /// Ledger records created by this batch.
    pub ledger_inserted: usize,
    /// Existing ledger records updated in place.
    pub ledger_updated: usize,
    pub total_duration_ms: u64,
    pub render_duration_ms: u64,
}

/// Summary of a spreadsheet without rendering anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectReport {
    pub sheet_name: String,
    pub rows: usize,
    pub duplicates: usize,
    /// Unique candidates in output order.
    pub candidates: Vec<CandidateSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub identifier: String,
    pub name: String,
    pub document_file_name: String,
}

impl From<&CandidateRecord> for CandidateSummary {
    fn from(c: &CandidateRecord) -> Self {
        Self {
            identifier: c.identifier.clone(),
            name: c.name.clone(),
            document_file_name: c.document_file_name(),
        }
    }
}
