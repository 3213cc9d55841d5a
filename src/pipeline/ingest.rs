//! Spreadsheet ingestion: first sheet → [`CandidateRecord`]s.
//!
//! calamine reads xlsx, xlsm, xlsb, xls and ods through one API. Decoding is
//! synchronous, so [`ingest`] runs it on tokio's blocking pool.
//!
//! The header row (absolute row 0) is always skipped. Each cell is coerced to
//! text before the fixed column layout is applied:
//!
//! | Cell | Text |
//! |------|------|
//! | string | trimmed |
//! | date-formatted number | `date_format` (default `dd-mm-yyyy`) |
//! | integral number | integer digits |
//! | other number | shortest decimal |
//! | boolean | `true` / `false` |
//! | formula | cached value by the rules above, formula text if it errored |
//! | empty | `""` |

use crate::candidate::{CandidateRecord, COLUMN_COUNT};
use crate::config::GenerationConfig;
use crate::error::CertBatchError;
use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{NaiveDate, NaiveDateTime};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Records read from one workbook.
#[derive(Debug, Clone)]
pub struct IngestedSheet {
    pub sheet_name: String,
    pub candidates: Vec<CandidateRecord>,
    /// Non-empty rows dropped for a blank identifier or name.
    pub invalid_rows: usize,
}

/// Parse `path` on the blocking pool.
pub async fn ingest(
    path: &Path,
    template_id: u64,
    config: &GenerationConfig,
) -> Result<IngestedSheet, CertBatchError> {
    let path = path.to_path_buf();
    let required = config.required_sheet_name.clone();
    let date_format = config.date_format.clone();

    tokio::task::spawn_blocking(move || {
        parse(&path, template_id, required.as_deref(), &date_format)
    })
    .await
    .map_err(|e| CertBatchError::Internal(format!("Ingest task panicked: {}", e)))?
}

/// Blocking implementation of ingestion.
///
/// Fails with `Ingest` when the file cannot be decoded or yields no valid
/// candidate, and with `Schema` when the first sheet is missing, unreadable,
/// or not named `required_sheet`.
pub fn parse(
    path: &Path,
    template_id: u64,
    required_sheet: Option<&str>,
    date_format: &str,
) -> Result<IngestedSheet, CertBatchError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| CertBatchError::Ingest {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| schema(path, "workbook has no sheets".into()))?;

    if let Some(required) = required_sheet {
        if sheet_name != required {
            return Err(schema(
                path,
                format!("first sheet is '{}', expected '{}'", sheet_name, required),
            ));
        }
    }

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| schema(path, "workbook has no sheets".into()))?
        .map_err(|e| schema(path, format!("cannot read sheet '{}': {}", sheet_name, e)))?;

    // Formula text is only needed when a cached value is an error.
    let has_errors = range.used_cells().any(|(_, _, c)| matches!(c, Data::Error(_)));
    let formulas = if has_errors {
        workbook.worksheet_formula(&sheet_name).ok()
    } else {
        None
    };

    let (candidates, invalid_rows) =
        read_rows(&range, formulas.as_ref(), template_id, date_format);

    info!(
        "Read {} candidates from sheet '{}' ({} rows without identifier or name)",
        candidates.len(),
        sheet_name,
        invalid_rows
    );

    if candidates.is_empty() {
        return Err(CertBatchError::Ingest {
            path: path.to_path_buf(),
            detail: "no candidates found".into(),
        });
    }

    Ok(IngestedSheet {
        sheet_name,
        candidates,
        invalid_rows,
    })
}

fn schema(path: &Path, detail: String) -> CertBatchError {
    CertBatchError::Schema {
        path: PathBuf::from(path),
        detail,
    }
}

fn read_rows(
    range: &Range<Data>,
    formulas: Option<&Range<String>>,
    template_id: u64,
    date_format: &str,
) -> (Vec<CandidateRecord>, usize) {
    let (Some(start), Some(end)) = (range.start(), range.end()) else {
        return (Vec::new(), 0);
    };

    let mut candidates = Vec::new();
    let mut invalid = 0usize;

    for row in start.0.max(1)..=end.0 {
        let cells: Vec<String> = (0..COLUMN_COUNT as u32)
            .map(|col| {
                let formula = formulas
                    .and_then(|f| f.get_value((row, col)))
                    .map(String::as_str);
                range
                    .get_value((row, col))
                    .map(|c| coerce(c, formula, date_format))
                    .unwrap_or_default()
            })
            .collect();

        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }

        match CandidateRecord::from_cells(&cells, template_id) {
            Some(rec) => candidates.push(rec),
            None => {
                debug!("Row {} dropped: blank identifier or name", row + 1);
                invalid += 1;
            }
        }
    }

    (candidates, invalid)
}

/// Coerce one cell to text. `formula` is the cell's formula, if any.
pub fn coerce(cell: &Data, formula: Option<&str>, date_format: &str) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => format_number(*f),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ndt) => format_date(&ndt, date_format),
            None => format_number(dt.as_f64()),
        },
        Data::DateTimeIso(s) => parse_iso(s)
            .map(|ndt| format_date(&ndt, date_format))
            .unwrap_or_else(|| s.trim().to_string()),
        Data::DurationIso(s) => s.trim().to_string(),
        Data::Error(_) => formula
            .map(|f| f.trim().to_string())
            .unwrap_or_default(),
        Data::Empty => String::new(),
    }
}

/// Integral values print without a fractional part; the rest use the
/// shortest representation that round-trips.
fn format_number(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

fn format_date(ndt: &NaiveDateTime, date_format: &str) -> String {
    let mut out = String::new();
    if write!(out, "{}", ndt.format(date_format)).is_err() {
        out.clear();
        let _ = write!(out, "{}", ndt.format("%d-%m-%Y"));
    }
    out
}

fn parse_iso(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    s.parse::<NaiveDateTime>()
        .ok()
        .or_else(|| s.parse::<NaiveDate>().ok().and_then(|d| d.and_hms_opt(0, 0, 0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::CellErrorType;
    use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};

    const HEADERS: [&str; 3] = ["Salutation", "Name", "SID"];

    #[test]
    fn coerce_scalar_cells() {
        assert_eq!(coerce(&Data::String("  Alice ".into()), None, "%d-%m-%Y"), "Alice");
        assert_eq!(coerce(&Data::Float(42.0), None, "%d-%m-%Y"), "42");
        assert_eq!(coerce(&Data::Float(2.5), None, "%d-%m-%Y"), "2.5");
        assert_eq!(coerce(&Data::Int(-7), None, "%d-%m-%Y"), "-7");
        assert_eq!(coerce(&Data::Bool(true), None, "%d-%m-%Y"), "true");
        assert_eq!(coerce(&Data::Empty, None, "%d-%m-%Y"), "");
    }

    #[test]
    fn coerce_iso_dates() {
        let iso = Data::DateTimeIso("2024-03-09T00:00:00".into());
        assert_eq!(coerce(&iso, None, "%d-%m-%Y"), "09-03-2024");
        let date_only = Data::DateTimeIso("2024-03-09".into());
        assert_eq!(coerce(&date_only, None, "%Y/%m/%d"), "2024/03/09");
    }

    #[test]
    fn error_cells_fall_back_to_formula_text() {
        let err = Data::Error(CellErrorType::Div0);
        assert_eq!(coerce(&err, Some("A1/0"), "%d-%m-%Y"), "A1/0");
        assert_eq!(coerce(&err, None, "%d-%m-%Y"), "");
    }

    fn write_sheet(path: &Path, name: &str, rows: &[Vec<&str>]) {
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        ws.set_name(name).unwrap();
        for (c, h) in HEADERS.iter().enumerate() {
            ws.write_string(0, c as u16, *h).unwrap();
        }
        for (r, row) in rows.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                ws.write_string(r as u32 + 1, c as u16, *v).unwrap();
            }
        }
        wb.save(path).unwrap();
    }

    #[test]
    fn parse_skips_header_empty_and_invalid_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.xlsx");
        write_sheet(
            &path,
            "Candidate Data",
            &[
                vec!["Ms", "Alice", "S1"],
                vec!["", "", ""],
                vec!["Mr", "", "S9"],
                vec!["Mr", "Bob", "S2"],
            ],
        );

        let sheet = parse(&path, 5, None, "%d-%m-%Y").unwrap();
        assert_eq!(sheet.sheet_name, "Candidate Data");
        assert_eq!(sheet.invalid_rows, 1);
        let ids: Vec<_> = sheet.candidates.iter().map(|c| c.identifier.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S2"]);
        assert!(sheet.candidates.iter().all(|c| c.template_id == 5));
    }

    #[test]
    fn numbers_and_dates_are_coerced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typed.xlsx");

        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        ws.write_string(0, 0, "header").unwrap();
        ws.write_string(1, 1, "Alice").unwrap();
        ws.write_number(1, 2, 1001.0).unwrap();
        let date = ExcelDateTime::from_ymd(2024, 1, 5).unwrap();
        let fmt = Format::new().set_num_format("dd/mm/yyyy");
        ws.write_datetime_with_format(1, 7, &date, &fmt).unwrap();
        ws.write_number(1, 14, 87.5).unwrap();
        wb.save(&path).unwrap();

        let sheet = parse(&path, 1, None, "%d-%m-%Y").unwrap();
        let c = &sheet.candidates[0];
        assert_eq!(c.identifier, "1001");
        assert_eq!(c.issuance_date, "05-01-2024");
        assert_eq!(c.marks[0], "87.5");
    }

    #[test]
    fn required_sheet_name_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.xlsx");
        write_sheet(&path, "Sheet1", &[vec!["Ms", "Alice", "S1"]]);

        let err = parse(&path, 1, Some("Candidate Data"), "%d-%m-%Y").unwrap_err();
        assert!(matches!(err, CertBatchError::Schema { .. }));
        assert!(err.to_string().contains("Sheet1"));
    }

    #[test]
    fn no_valid_rows_is_no_candidates_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.xlsx");
        write_sheet(&path, "Sheet1", &[vec!["Ms", "Alice", ""], vec!["Mr", "Bob", " "]]);

        let err = parse(&path, 1, None, "%d-%m-%Y").unwrap_err();
        assert!(matches!(err, CertBatchError::Ingest { .. }));
        assert!(err.to_string().contains("no candidates found"));
    }

    #[test]
    fn unreadable_file_is_ingest_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.xlsx");
        std::fs::write(&path, b"not a workbook").unwrap();
        assert!(matches!(
            parse(&path, 1, None, "%d-%m-%Y"),
            Err(CertBatchError::Ingest { .. })
        ));
    }
}
