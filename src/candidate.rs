//! Candidate records and the naming rules derived from them.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of mark columns (`marks`, `marks1` … `marks10`).
pub const MARK_COLUMNS: usize = 11;

/// Number of columns read from each spreadsheet row.
pub const COLUMN_COUNT: usize = 29;

/// Column positions of the input sheet.
pub mod column {
    pub const SALUTATION: usize = 0;
    pub const NAME: usize = 1;
    pub const IDENTIFIER: usize = 2;
    pub const ROLE: usize = 3;
    pub const GUARDIAN_TYPE: usize = 4;
    pub const GUARDIAN_NAME: usize = 5;
    pub const SKILL_COUNCIL: usize = 6;
    pub const ISSUANCE_DATE: usize = 7;
    pub const LEVEL: usize = 8;
    pub const ID_NUMBER: usize = 9;
    pub const SECTOR: usize = 10;
    pub const GRADE: usize = 11;
    pub const START_DATE: usize = 12;
    pub const END_DATE: usize = 13;
    pub const MARKS_FIRST: usize = 14;
    pub const BATCH_ID: usize = 25;
    pub const STATE: usize = 26;
    pub const DISTRICT: usize = 27;
    pub const PLACE: usize = 28;
}

/// Placeholder names a template layout may reference, in column order.
pub const FIELD_NAMES: [&str; COLUMN_COUNT] = [
    "salutation",
    "candidateName",
    "sid",
    "jobRole",
    "guardianType",
    "guardianName",
    "sectorSkillCouncil",
    "dateOfIssuance",
    "level",
    "idNumber",
    "sector",
    "grade",
    "dateOfStart",
    "dateOfEnd",
    "marks",
    "marks1",
    "marks2",
    "marks3",
    "marks4",
    "marks5",
    "marks6",
    "marks7",
    "marks8",
    "marks9",
    "marks10",
    "batchId",
    "state",
    "district",
    "place",
];

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9\-_]").expect("static regex"));

/// One spreadsheet row, coerced to text.
///
/// `identifier` and `name` are always non-blank; rows without them never
/// become records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub identifier: String,
    pub name: String,
    pub salutation: String,
    pub role: String,
    pub guardian_type: String,
    pub guardian_name: String,
    pub skill_council: String,
    pub issuance_date: String,
    pub level: String,
    pub id_number: String,
    pub sector: String,
    pub grade: String,
    pub start_date: String,
    pub end_date: String,
    pub marks: [String; MARK_COLUMNS],
    pub batch_id: String,
    pub state: String,
    pub district: String,
    pub place: String,
    pub template_id: u64,
}

impl CandidateRecord {
    /// Build a record from one row of coerced cells.
    ///
    /// Returns `None` when the identifier or name is blank. Missing trailing
    /// cells read as empty.
    pub fn from_cells(cells: &[String], template_id: u64) -> Option<Self> {
        let cell = |i: usize| cells.get(i).map(|s| s.trim().to_string()).unwrap_or_default();

        let identifier = cell(column::IDENTIFIER);
        let name = cell(column::NAME);
        if identifier.is_empty() || name.is_empty() {
            return None;
        }

        let marks = std::array::from_fn(|i| cell(column::MARKS_FIRST + i));

        Some(Self {
            identifier,
            name,
            salutation: cell(column::SALUTATION),
            role: cell(column::ROLE),
            guardian_type: cell(column::GUARDIAN_TYPE),
            guardian_name: cell(column::GUARDIAN_NAME),
            skill_council: cell(column::SKILL_COUNCIL),
            issuance_date: cell(column::ISSUANCE_DATE),
            level: cell(column::LEVEL),
            id_number: cell(column::ID_NUMBER),
            sector: cell(column::SECTOR),
            grade: cell(column::GRADE),
            start_date: cell(column::START_DATE),
            end_date: cell(column::END_DATE),
            marks,
            batch_id: cell(column::BATCH_ID),
            state: cell(column::STATE),
            district: cell(column::DISTRICT),
            place: cell(column::PLACE),
            template_id,
        })
    }

    /// Field name → value, the single-row data source handed to a renderer.
    pub fn fields(&self) -> BTreeMap<&'static str, String> {
        let mut values: Vec<&str> = [
            &self.salutation,
            &self.name,
            &self.identifier,
            &self.role,
            &self.guardian_type,
            &self.guardian_name,
            &self.skill_council,
            &self.issuance_date,
            &self.level,
            &self.id_number,
            &self.sector,
            &self.grade,
            &self.start_date,
            &self.end_date,
        ]
        .into_iter()
        .map(String::as_str)
        .collect();
        values.extend(self.marks.iter().map(String::as_str));
        values.extend([
            self.batch_id.as_str(),
            self.state.as_str(),
            self.district.as_str(),
            self.place.as_str(),
        ]);

        FIELD_NAMES
            .iter()
            .zip(values)
            .map(|(k, v)| (*k, v.to_string()))
            .collect()
    }

    /// File name of this candidate's rendered document:
    /// `<identifier>_<name>.pdf`, both sanitized.
    pub fn document_file_name(&self) -> String {
        format!("{}_{}.pdf", sanitize(&self.identifier), sanitize(&self.name))
    }

    /// Entry name inside the output archive: `<name>_<identifier>.pdf`.
    pub fn archive_entry_name(&self) -> String {
        format!("{}_{}.pdf", sanitize(&self.name), sanitize(&self.identifier))
    }
}

/// Replace every character outside `[A-Za-z0-9-_]` with `_`.
pub fn sanitize(s: &str) -> String {
    UNSAFE_CHARS.replace_all(s, "_").into_owned()
}
